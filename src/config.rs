// ⚙️ Pipeline configuration
//
// Loaded from an optional JSON file; every section and field has a default, so
// `{}` (or no file at all) is a valid configuration:
//
//   {
//     "paths": {"base_dir": "data"},
//     "fx": {"cache_hours": 12},
//     "legacy_inputs": ["data/legacy/merged.json"],
//     "category_aliases": {"SB Gen 60-64": "60-64"}
//   }

use crate::deduplication::ResolutionPolicy;
use crate::entities::{Category, CategoryRegistry};
use crate::error::{PipelineError, Result};
use crate::parser::SheetLayout;
use chrono::{Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const TOKEN_ENV_VAR: &str = "BANXICO_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub paths: PathsConfig,
    pub layout: SheetLayout,
    pub validation: ValidationConfig,
    pub fx: FxConfig,

    /// Previously exported record sets, merged below fresh reports
    pub legacy_inputs: Vec<PathBuf>,

    /// Extra label → category aliases on top of the built-in ones
    pub category_aliases: BTreeMap<String, Category>,
}

impl PipelineConfig {
    /// Load from a JSON file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: PipelineConfig = match path {
            Some(path) => {
                let text = fs::read_to_string(path)?;
                serde_json::from_str(&text)?
            }
            None => PipelineConfig::default(),
        };
        config.fx.cache_max_age()?;
        Ok(config)
    }

    pub fn category_registry(&self) -> CategoryRegistry {
        let mut registry = CategoryRegistry::with_defaults();
        for (alias, category) in &self.category_aliases {
            registry.register_alias(alias, *category);
        }
        registry
    }
}

// ============================================================================
// PATHS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub base_dir: PathBuf,
    /// Defaults to `<base_dir>/reports`
    pub reports_dir: Option<PathBuf>,
    /// Defaults to `<base_dir>/output`
    pub output_dir: Option<PathBuf>,
    pub canonical_file: String,
    pub enriched_file: String,
    pub fx_cache_file: String,
    pub database_file: String,
    pub rebuild_summary_file: String,
    pub coverage_summary_file: String,
    pub unmatched_periods_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        PathsConfig {
            base_dir: PathBuf::from("data"),
            reports_dir: None,
            output_dir: None,
            canonical_file: "canonical.json".to_string(),
            enriched_file: "enriched.json".to_string(),
            fx_cache_file: "fx_data.json".to_string(),
            database_file: "afore.db".to_string(),
            rebuild_summary_file: "rebuild_summary.csv".to_string(),
            coverage_summary_file: "coverage_summary.csv".to_string(),
            unmatched_periods_file: "unmatched_periods.csv".to_string(),
        }
    }
}

impl PathsConfig {
    /// All paths rooted at `base_dir`
    pub fn rooted_at(base_dir: &Path) -> Self {
        PathsConfig {
            base_dir: base_dir.to_path_buf(),
            ..PathsConfig::default()
        }
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.reports_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("reports"))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.base_dir.join("output"))
    }

    pub fn canonical_path(&self) -> PathBuf {
        self.output_dir().join(&self.canonical_file)
    }

    pub fn enriched_path(&self) -> PathBuf {
        self.output_dir().join(&self.enriched_file)
    }

    pub fn fx_cache_path(&self) -> PathBuf {
        self.output_dir().join(&self.fx_cache_file)
    }

    pub fn database_path(&self) -> PathBuf {
        self.output_dir().join(&self.database_file)
    }

    pub fn rebuild_summary_path(&self) -> PathBuf {
        self.output_dir().join(&self.rebuild_summary_file)
    }

    pub fn coverage_summary_path(&self) -> PathBuf {
        self.output_dir().join(&self.coverage_summary_file)
    }

    pub fn unmatched_periods_path(&self) -> PathBuf {
        self.output_dir().join(&self.unmatched_periods_file)
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_year: i32,
    /// Data vintage; defaults to the current calendar year
    pub max_year: i32,
    pub duplicate_policy: ResolutionPolicy,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            min_year: 2019,
            max_year: Utc::now().year(),
            duplicate_policy: ResolutionPolicy::default(),
        }
    }
}

// ============================================================================
// FX
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FxConfig {
    /// SF43718 = FIX rate, pesos per US dollar
    pub series_id: String,
    pub api_base: String,
    /// Falls back to BANXICO_TOKEN
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub cache_hours: i64,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub min_rate: f64,
    pub max_rate: f64,
}

impl Default for FxConfig {
    fn default() -> Self {
        FxConfig {
            series_id: "SF43718".to_string(),
            api_base: "https://www.banxico.org.mx/SieAPIRest/service/v1".to_string(),
            token: None,
            cache_hours: 24,
            timeout_secs: 30,
            max_retries: 3,
            min_rate: 1.0,
            max_rate: 30.0,
        }
    }
}

impl FxConfig {
    pub fn resolved_token(&self) -> Option<String> {
        self.token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| std::env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.trim().is_empty()))
    }

    pub fn cache_max_age(&self) -> Result<Duration> {
        Duration::try_hours(self.cache_hours)
            .filter(|age| *age >= Duration::zero())
            .ok_or_else(|| PipelineError::Validation {
                source_name: "configuration".to_string(),
                field: "fx.cache_hours".to_string(),
                message: format!("{} is not a usable cache age", self.cache_hours),
            })
    }
}
