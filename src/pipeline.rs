// 🚀 Pipeline orchestrator
//
//   1/3 rebuild    reports (parallel) + legacy inputs → normalizer → canonical.json + SQLite
//   2/3 fetch FX   cache aware: refresh when stale or forced, reuse otherwise
//   3/3 enrich     canonical × FX → enriched.json + SQLite + unmatched periods
//   verify         every expected output exists; sizes are logged

use crate::config::PipelineConfig;
use crate::db::{self, Event};
use crate::enrichment::{enrich, EnrichmentSummary};
use crate::entities::ReportId;
use crate::error::PipelineError;
use crate::fx::FxSeriesStore;
use crate::fx_fetch::FxSource;
use crate::normalizer::{NormalizationReport, RecordNormalizer, RecordSetStats};
use crate::parser::get_parser;
use crate::period::PeriodKey;
use crate::record::{CanonicalRecord, RawRecord};
use crate::report::{self, RebuildRow, RebuildStatus};
use anyhow::{bail, Context, Result};
use rayon::prelude::*;
use rusqlite::Connection;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

const ACTOR: &str = "afore-pipeline";

/// Rank given to legacy inputs; every fresh report outranks them
pub const LEGACY_RANK: usize = 0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Reuse canonical.json instead of re-extracting (falls back to a rebuild if absent)
    pub skip_rebuild: bool,
    /// Reuse the FX cache regardless of age
    pub skip_fx: bool,
    /// Refresh the FX cache regardless of age
    pub force_fx: bool,
}

#[derive(Debug, Clone)]
pub struct RebuildOutcome {
    pub records: Vec<CanonicalRecord>,
    pub rows: Vec<RebuildRow>,
    pub normalization: NormalizationReport,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputFile {
    pub path: PathBuf,
    pub bytes: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub records: usize,
    pub fingerprint: String,
    pub fx_gaps: Vec<PeriodKey>,
    pub enrichment: EnrichmentSummary,
    pub outputs: Vec<OutputFile>,
    pub duration: Duration,
}

pub struct Pipeline {
    config: PipelineConfig,
    run_id: String,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Pipeline {
            config,
            run_id: db::new_run_id(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn open_database(&self) -> Result<Connection> {
        let path = self.config.paths.database_path();
        db::open_database(&path).with_context(|| format!("Failed to prepare database {}", path.display()))
    }

    fn log_event(&self, conn: &Connection, event_type: &str, data: serde_json::Value) {
        let event = Event::new(event_type, "run", &self.run_id, data, ACTOR);
        if let Err(e) = db::insert_event(conn, &event) {
            warn!(event_type, error = %e, "failed to record audit event");
        }
    }

    // ========================================================================
    // STEP 1: REBUILD
    // ========================================================================

    fn extract_one(&self, report: ReportId) -> (RebuildRow, std::result::Result<Vec<RawRecord>, PipelineError>) {
        let path = self.config.paths.reports_dir().join(report.file_name());

        if !path.exists() {
            warn!(report = %report, path = %path.display(), "report file not found");
            let row = RebuildRow {
                report,
                status: RebuildStatus::FileNotFound,
                records_extracted: 0,
            };
            return (row, Ok(Vec::new()));
        }

        let parser = get_parser(report, self.config.layout.clone());
        match parser.parse(&path) {
            Ok(records) => {
                let row = RebuildRow {
                    report,
                    status: RebuildStatus::Success,
                    records_extracted: records.len(),
                };
                (row, Ok(records))
            }
            Err(e) => {
                error!(report = %report, error = %e, "extraction failed");
                let row = RebuildRow {
                    report,
                    status: RebuildStatus::Failed(e.to_string()),
                    records_extracted: 0,
                };
                (row, Err(e))
            }
        }
    }

    /// Extract all mapped reports in parallel; results stay in report order.
    ///
    /// A failed report is recorded in its row and skipped. Errors that are not
    /// scoped to one report abort the run.
    pub fn extract_reports(&self) -> Result<(Vec<RawRecord>, Vec<RebuildRow>)> {
        let outcomes: Vec<_> = ReportId::all()
            .par_iter()
            .map(|report| self.extract_one(*report))
            .collect();

        let mut records = Vec::new();
        let mut rows = Vec::with_capacity(outcomes.len());

        for (row, outcome) in outcomes {
            match outcome {
                Ok(mut extracted) => records.append(&mut extracted),
                Err(e) if e.is_source_scoped() => {}
                Err(e) => return Err(e).with_context(|| format!("Extraction of {} aborted the run", row.report)),
            }
            rows.push(row);
        }

        Ok((records, rows))
    }

    fn load_legacy_inputs(&self) -> Result<Vec<RawRecord>> {
        let mut records = Vec::new();
        for path in &self.config.legacy_inputs {
            let mut loaded = db::load_legacy_records(path, LEGACY_RANK)
                .with_context(|| format!("Failed to load legacy input {}", path.display()))?;
            records.append(&mut loaded);
        }
        Ok(records)
    }

    pub fn rebuild(&self) -> Result<RebuildOutcome> {
        info!("step 1/3: rebuilding canonical record set");
        let conn = self.open_database()?;
        self.log_event(
            &conn,
            "rebuild_started",
            serde_json::json!({ "reports_dir": self.config.paths.reports_dir().display().to_string() }),
        );

        // Legacy first: arrival order only matters within equal rank, but keep it stable
        let mut raw = self.load_legacy_inputs()?;
        let (mut extracted, rows) = self.extract_reports()?;
        raw.append(&mut extracted);

        let paths = &self.config.paths;
        fs::create_dir_all(paths.output_dir())?;
        report::write_rebuild_summary(&paths.rebuild_summary_path(), &rows)?;

        for row in rows.iter().filter(|r| r.status != RebuildStatus::Success) {
            self.log_event(
                &conn,
                "report_skipped",
                serde_json::json!({ "report": row.report.number(), "status": row.status.to_string() }),
            );
        }

        if raw.is_empty() {
            bail!(
                "No records extracted: no report in {} could be read and no legacy inputs are configured",
                paths.reports_dir().display()
            );
        }

        let validation = &self.config.validation;
        let normalizer = RecordNormalizer::new(validation.min_year, validation.max_year)
            .with_categories(self.config.category_registry())
            .with_policy(validation.duplicate_policy);
        let (records, normalization) = normalizer.normalize(raw).context("Normalization failed")?;

        for collision in &normalization.collisions {
            self.log_event(&conn, "duplicate_resolved", serde_json::to_value(collision)?);
        }

        db::write_records_json(&paths.canonical_path(), &records)?;
        report::write_coverage_summary(&paths.coverage_summary_path(), &records)?;
        let stored = db::replace_canonical_records(&conn, &self.run_id, &records)?;
        let fingerprint = db::fingerprint(&records);

        self.log_event(
            &conn,
            "rebuild_finished",
            serde_json::json!({
                "records": records.len(),
                "stored": stored.inserted,
                "collisions": normalization.collisions.len(),
                "fingerprint": fingerprint,
            }),
        );
        info!(
            records = records.len(),
            fingerprint = %fingerprint,
            "{}",
            normalization.stats.summary()
        );

        Ok(RebuildOutcome {
            records,
            rows,
            normalization,
            fingerprint,
        })
    }

    /// Canonical set from the previous run
    pub fn load_canonical(&self) -> Result<Vec<CanonicalRecord>> {
        let path = self.config.paths.canonical_path();
        db::read_canonical_json(&path).with_context(|| format!("Failed to read canonical set {}", path.display()))
    }

    // ========================================================================
    // STEP 2: FX
    // ========================================================================

    /// Bring the FX store up to date for the periods the records need
    pub fn prepare_fx(&self, records: &[CanonicalRecord], source: &dyn FxSource, options: RunOptions) -> Result<FxSeriesStore> {
        info!("step 2/3: preparing FX series");
        let fx_config = &self.config.fx;
        let cache_path = self.config.paths.fx_cache_path();
        let mut store = FxSeriesStore::load_or_empty(&cache_path, &fx_config.series_id)
            .with_context(|| format!("Failed to read FX cache {}", cache_path.display()))?;

        let stats = RecordSetStats::from_records(records);
        let (Some(first), Some(last)) = (stats.first_period, stats.last_period) else {
            warn!("no records, nothing to convert");
            return Ok(store);
        };

        if options.skip_fx {
            if store.is_empty() {
                bail!("--skip-fx given but no FX cache at {}", cache_path.display());
            }
            info!(months = store.len(), "reusing cached FX series");
        } else if options.force_fx || store.is_stale(fx_config.cache_max_age()?) {
            match store.refresh(source, first, last) {
                Ok(()) => {
                    store
                        .save(&cache_path)
                        .with_context(|| format!("Failed to write FX cache {}", cache_path.display()))?;
                    let conn = self.open_database()?;
                    db::save_fx_rates(&conn, &store)?;
                    self.log_event(
                        &conn,
                        "fx_refreshed",
                        serde_json::json!({ "series": store.series_id(), "months": store.len() }),
                    );
                }
                Err(e) if !store.is_empty() => {
                    warn!(error = %e, months = store.len(), "FX refresh failed, using cached series");
                }
                Err(e) => return Err(e).context("FX refresh failed and no cached series exists"),
            }
        } else {
            info!(months = store.len(), "FX cache is fresh");
        }

        let gaps = store.coverage_gaps(&stats.required_periods());
        if !gaps.is_empty() {
            warn!(
                gaps = gaps.len(),
                first_gap = %gaps[0],
                "FX series does not cover every period in the record set"
            );
        }

        Ok(store)
    }

    // ========================================================================
    // STEP 3: ENRICH
    // ========================================================================

    pub fn enrich(&self, records: &[CanonicalRecord], store: &FxSeriesStore) -> Result<EnrichmentSummary> {
        info!("step 3/3: enriching records with FX");
        let paths = &self.config.paths;

        let (enriched, summary) = enrich(records, store);

        db::write_records_json(&paths.enriched_path(), &enriched)?;
        report::write_unmatched_periods(&paths.unmatched_periods_path(), &enriched)?;

        let conn = self.open_database()?;
        db::replace_enriched_records(&conn, &self.run_id, &enriched)?;
        self.log_event(&conn, "enrichment_finished", serde_json::to_value(&summary)?);

        info!("{}", summary.summary());
        Ok(summary)
    }

    // ========================================================================
    // VERIFY
    // ========================================================================

    pub fn verify_outputs(&self) -> Result<Vec<OutputFile>> {
        let paths = &self.config.paths;
        let expected = [
            paths.canonical_path(),
            paths.enriched_path(),
            paths.fx_cache_path(),
            paths.database_path(),
            paths.coverage_summary_path(),
            paths.unmatched_periods_path(),
        ];

        let outputs: Vec<OutputFile> = expected
            .into_iter()
            .map(|path| {
                let bytes = fs::metadata(&path).ok().map(|m| m.len());
                match bytes {
                    Some(bytes) => info!(path = %path.display(), bytes, "output verified"),
                    None => warn!(path = %path.display(), "output missing"),
                }
                OutputFile { path, bytes }
            })
            .collect();

        let missing: Vec<String> = outputs
            .iter()
            .filter(|o| o.bytes.is_none())
            .map(|o| o.path.display().to_string())
            .collect();
        if !missing.is_empty() {
            bail!("Missing outputs: {}", missing.join(", "));
        }

        Ok(outputs)
    }

    // ========================================================================
    // FULL RUN
    // ========================================================================

    pub fn run(&self, source: &dyn FxSource, options: RunOptions) -> Result<RunSummary> {
        let started = Instant::now();
        info!(run_id = %self.run_id, ?options, "pipeline started");

        let canonical_path = self.config.paths.canonical_path();
        let records = if options.skip_rebuild && canonical_path.exists() {
            info!(path = %canonical_path.display(), "step 1/3 skipped: reusing canonical set");
            self.load_canonical()?
        } else {
            if options.skip_rebuild {
                warn!(path = %canonical_path.display(), "no canonical set to reuse, rebuilding");
            }
            self.rebuild()?.records
        };

        let store = self.prepare_fx(&records, source, options)?;
        let required = RecordSetStats::from_records(&records).required_periods();
        let fx_gaps = store.coverage_gaps(&required);

        let enrichment = self.enrich(&records, &store)?;
        let outputs = self.verify_outputs()?;

        let duration = started.elapsed();
        info!(
            run_id = %self.run_id,
            records = records.len(),
            seconds = duration.as_secs_f64(),
            "pipeline finished"
        );

        Ok(RunSummary {
            run_id: self.run_id.clone(),
            records: records.len(),
            fingerprint: db::fingerprint(&records),
            fx_gaps,
            enrichment,
            outputs,
            duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use std::collections::BTreeMap;

    struct FailingSource;

    impl FxSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn fetch_monthly(&self, _first: PeriodKey, _last: PeriodKey) -> crate::error::Result<BTreeMap<PeriodKey, f64>> {
            Err(PipelineError::Fetch("offline".to_string()))
        }
    }

    fn pipeline_in(dir: &std::path::Path) -> Pipeline {
        let config = PipelineConfig {
            paths: PathsConfig::rooted_at(dir),
            ..PipelineConfig::default()
        };
        Pipeline::new(config)
    }

    #[test]
    fn test_missing_reports_are_rows_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());

        let (records, rows) = pipeline.extract_reports().unwrap();
        assert!(records.is_empty());
        assert_eq!(rows.len(), 11);
        assert!(rows.iter().all(|r| r.status == RebuildStatus::FileNotFound));
        assert_eq!(rows[0].report.number(), 16);
    }

    #[test]
    fn test_rebuild_without_any_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(pipeline_in(dir.path()).rebuild().is_err());
    }

    #[test]
    fn test_skip_fx_without_cache_fails() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline_in(dir.path());
        let records = vec![CanonicalRecord {
            entity: "Azteca".to_string(),
            category: crate::entities::Category::Inicial,
            concept: crate::entities::Concept::TotalAssets,
            period_year: 2024,
            period_month: 5,
            value_local: 1.0,
        }];
        let options = RunOptions {
            skip_fx: true,
            ..RunOptions::default()
        };
        assert!(pipeline.prepare_fx(&records, &FailingSource, options).is_err());
        assert!(pipeline
            .prepare_fx(&records, &FailingSource, RunOptions::default())
            .is_err());
    }
}
