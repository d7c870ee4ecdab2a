// 💱 FX Series Store - end-of-month rates keyed by period
//
// An explicit, passed-in store (no process-wide cache). The store knows when it
// was fetched, which makes staleness and refresh timing testable:
//
//   let mut store = FxSeriesStore::load_or_empty(path)?;
//   if store.is_stale(max_age) { store.refresh(&source, first, last)?; store.save(path)?; }
//   store.coverage_gaps(&required)   // periods a human must decide about

use crate::error::{PipelineError, Result};
use crate::fx_fetch::FxSource;
use crate::period::PeriodKey;
use crate::record::int_or_string;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// On-disk form of the store
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedSeries {
    series_id: String,
    fetched_at: DateTime<Utc>,
    rates: BTreeMap<PeriodKey, f64>,
}

/// Row form written by older exports
#[derive(Debug, Deserialize)]
struct RateRow {
    #[serde(rename = "PeriodYear", deserialize_with = "int_or_string")]
    period_year: i32,
    #[serde(rename = "PeriodMonth", deserialize_with = "int_or_string")]
    period_month: u32,
    #[serde(rename = "FX_EOM")]
    fx_eom: f64,
}

fn rates_from_rows(path: &Path, rows: Vec<RateRow>) -> Result<BTreeMap<PeriodKey, f64>> {
    rows.into_iter()
        .map(|row| -> Result<(PeriodKey, f64)> {
            let period = PeriodKey::new(row.period_year, row.period_month).ok_or_else(|| PipelineError::Validation {
                source_name: path.display().to_string(),
                field: "PeriodMonth".to_string(),
                message: format!("{}-{} is not a valid period", row.period_year, row.period_month),
            })?;
            Ok((period, row.fx_eom))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct FxSeriesStore {
    series_id: String,
    /// Local-currency units per one foreign-currency unit
    rates: BTreeMap<PeriodKey, f64>,
    /// `None` = never fetched (always stale)
    fetched_at: Option<DateTime<Utc>>,
}

impl FxSeriesStore {
    /// Empty, never-fetched store
    pub fn empty(series_id: &str) -> Self {
        FxSeriesStore {
            series_id: series_id.to_string(),
            rates: BTreeMap::new(),
            fetched_at: None,
        }
    }

    pub fn from_rates(series_id: &str, rates: BTreeMap<PeriodKey, f64>, fetched_at: DateTime<Utc>) -> Self {
        FxSeriesStore {
            series_id: series_id.to_string(),
            rates,
            fetched_at: Some(fetched_at),
        }
    }

    /// Build from a plain mapping such as `{"2024-07": 17.85}`.
    /// The fetch time is taken to be now.
    pub fn from_mapping_json(series_id: &str, json: &str) -> Result<Self> {
        let rates: BTreeMap<PeriodKey, f64> = serde_json::from_str(json)?;
        Ok(FxSeriesStore::from_rates(series_id, rates, Utc::now()))
    }

    pub fn series_id(&self) -> &str {
        &self.series_id
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    pub fn rates(&self) -> &BTreeMap<PeriodKey, f64> {
        &self.rates
    }

    pub fn first_period(&self) -> Option<PeriodKey> {
        self.rates.keys().next().copied()
    }

    pub fn last_period(&self) -> Option<PeriodKey> {
        self.rates.keys().next_back().copied()
    }

    // ========================================================================
    // LOOKUP & COVERAGE
    // ========================================================================

    /// Rate for a period. `None` means missing; neighbours are never used to
    /// fill the gap.
    pub fn get(&self, period: PeriodKey) -> Option<f64> {
        self.rates.get(&period).copied()
    }

    /// True if the store was fetched more than `max_age` ago (or never)
    pub fn is_stale(&self, max_age: Duration) -> bool {
        self.is_stale_at(Utc::now(), max_age)
    }

    pub fn is_stale_at(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match self.fetched_at {
            Some(fetched_at) => now - fetched_at > max_age,
            None => true,
        }
    }

    /// Required periods with no observation, ascending and deduplicated
    pub fn coverage_gaps<'a, I>(&self, required: I) -> Vec<PeriodKey>
    where
        I: IntoIterator<Item = &'a PeriodKey>,
    {
        let mut gaps: Vec<PeriodKey> = required
            .into_iter()
            .filter(|p| !self.rates.contains_key(p))
            .copied()
            .collect();
        gaps.sort();
        gaps.dedup();
        gaps
    }

    // ========================================================================
    // REFRESH
    // ========================================================================

    /// Replace the series with a fresh fetch covering `first..=last`.
    ///
    /// On failure the current contents stay untouched.
    pub fn refresh(&mut self, source: &dyn FxSource, first: PeriodKey, last: PeriodKey) -> Result<()> {
        let fetched = source.fetch_monthly(first, last)?;
        if fetched.is_empty() {
            return Err(PipelineError::Fetch(format!(
                "{} returned no observations for {}..{}",
                source.name(),
                first,
                last
            )));
        }

        info!(
            source = source.name(),
            series = %self.series_id,
            months = fetched.len(),
            "FX series refreshed"
        );

        self.rates = fetched;
        self.fetched_at = Some(Utc::now());
        Ok(())
    }

    // ========================================================================
    // CACHE FILE
    // ========================================================================

    pub fn save(&self, path: &Path) -> Result<()> {
        let Some(fetched_at) = self.fetched_at else {
            warn!(path = %path.display(), "refusing to cache a never-fetched FX series");
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let cached = CachedSeries {
            series_id: self.series_id.clone(),
            fetched_at,
            rates: self.rates.clone(),
        };
        fs::write(path, serde_json::to_string_pretty(&cached)?)?;
        Ok(())
    }

    /// Load a cache file. Accepts the full cache form, a plain
    /// `{"YYYY-MM": rate}` mapping, or a `[{PeriodYear, PeriodMonth, FX_EOM}]`
    /// row list. The last two carry no fetch time, so the file's modification
    /// time stands in for it.
    pub fn load(path: &Path, series_id: &str) -> Result<Self> {
        let text = fs::read_to_string(path)?;

        let cache_err = match serde_json::from_str::<CachedSeries>(&text) {
            Ok(cached) => {
                return Ok(FxSeriesStore::from_rates(&cached.series_id, cached.rates, cached.fetched_at));
            }
            Err(e) => e,
        };

        let rates = if let Ok(rates) = serde_json::from_str::<BTreeMap<PeriodKey, f64>>(&text) {
            rates
        } else if let Ok(rows) = serde_json::from_str::<Vec<RateRow>>(&text) {
            rates_from_rows(path, rows)?
        } else {
            return Err(cache_err.into());
        };

        let fetched_at = fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .ok();
        if fetched_at.is_none() {
            warn!(path = %path.display(), "FX cache has no modification time, treating as stale");
        }

        Ok(FxSeriesStore {
            series_id: series_id.to_string(),
            rates,
            fetched_at,
        })
    }

    /// Load the cache if present, otherwise start empty (stale)
    pub fn load_or_empty(path: &Path, series_id: &str) -> Result<Self> {
        if path.exists() {
            FxSeriesStore::load(path, series_id)
        } else {
            Ok(FxSeriesStore::empty(series_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::Cell as Counter;

    fn key(year: i32, month: u32) -> PeriodKey {
        PeriodKey::new(year, month).unwrap()
    }

    fn store() -> FxSeriesStore {
        let fetched = Utc.with_ymd_and_hms(2025, 10, 1, 12, 0, 0).unwrap();
        let rates = BTreeMap::from([(key(2025, 7), 18.7), (key(2025, 8), 18.6)]);
        FxSeriesStore::from_rates("SF43718", rates, fetched)
    }

    struct StubSource {
        rates: BTreeMap<PeriodKey, f64>,
        calls: Counter<usize>,
    }

    impl FxSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        fn fetch_monthly(&self, _first: PeriodKey, _last: PeriodKey) -> Result<BTreeMap<PeriodKey, f64>> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.rates.clone())
        }
    }

    #[test]
    fn test_get_never_interpolates() {
        let s = store();
        assert_eq!(s.get(key(2025, 7)), Some(18.7));
        assert_eq!(s.get(key(2025, 9)), None);
        assert_eq!(s.get(key(2025, 6)), None);
    }

    #[test]
    fn test_staleness() {
        let s = store();
        let fetched = s.fetched_at().unwrap();
        assert!(!s.is_stale_at(fetched + Duration::hours(23), Duration::hours(24)));
        assert!(s.is_stale_at(fetched + Duration::hours(25), Duration::hours(24)));
        assert!(FxSeriesStore::empty("SF43718").is_stale(Duration::hours(24)));
    }

    #[test]
    fn test_coverage_gaps() {
        let s = store();
        let required: Vec<PeriodKey> = PeriodKey::range(key(2025, 6), key(2025, 9)).collect();
        assert_eq!(s.coverage_gaps(&required), vec![key(2025, 6), key(2025, 9)]);
    }

    #[test]
    fn test_refresh_replaces_rates_and_timestamp() {
        let mut s = FxSeriesStore::empty("SF43718");
        let source = StubSource {
            rates: BTreeMap::from([(key(2025, 9), 18.4)]),
            calls: Counter::new(0),
        };
        s.refresh(&source, key(2025, 9), key(2025, 9)).unwrap();
        assert_eq!(source.calls.get(), 1);
        assert_eq!(s.get(key(2025, 9)), Some(18.4));
        assert!(!s.is_stale(Duration::hours(1)));
    }

    #[test]
    fn test_refresh_with_empty_fetch_keeps_old_rates() {
        let mut s = store();
        let source = StubSource {
            rates: BTreeMap::new(),
            calls: Counter::new(0),
        };
        assert!(s.refresh(&source, key(2025, 1), key(2025, 9)).is_err());
        assert_eq!(s.len(), 2);
    }

    #[test]
    fn test_plain_mapping() {
        let s = FxSeriesStore::from_mapping_json("SF43718", r#"{"2024-07": 17.85, "2024-08": 19.5}"#).unwrap();
        assert_eq!(s.get(key(2024, 7)), Some(17.85));
        assert_eq!(s.first_period(), Some(key(2024, 7)));
        assert_eq!(s.last_period(), Some(key(2024, 8)));
    }

    #[test]
    fn test_cache_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fx_data.json");
        let s = store();
        s.save(&path).unwrap();
        let loaded = FxSeriesStore::load(&path, "ignored").unwrap();
        assert_eq!(loaded, s);
    }

    fn age_file(path: &Path, days: u64) {
        let file = fs::File::options().write(true).open(path).unwrap();
        let then = std::time::SystemTime::now() - std::time::Duration::from_secs(days * 24 * 3600);
        file.set_modified(then).unwrap();
    }

    #[test]
    fn test_plain_mapping_cache_ages_with_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fx_data.json");
        fs::write(&path, r#"{"2024-07": 17.85}"#).unwrap();

        let fresh = FxSeriesStore::load(&path, "SF43718").unwrap();
        assert!(!fresh.is_stale(Duration::hours(24)));

        age_file(&path, 90);
        let old = FxSeriesStore::load(&path, "SF43718").unwrap();
        assert!(old.is_stale(Duration::hours(24)));
        assert_eq!(old.get(key(2024, 7)), Some(17.85));
    }

    #[test]
    fn test_row_list_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fx_data.json");
        fs::write(
            &path,
            r#"[{"PeriodYear": 2025, "PeriodMonth": 7, "FX_EOM": 18.5683},
                {"PeriodYear": "2025", "PeriodMonth": "08", "FX_EOM": 18.6095}]"#,
        )
        .unwrap();

        let s = FxSeriesStore::load(&path, "SF43718").unwrap();
        assert_eq!(s.len(), 2);
        assert_eq!(s.get(key(2025, 8)), Some(18.6095));
        assert_eq!(s.series_id(), "SF43718");

        age_file(&path, 3);
        assert!(FxSeriesStore::load(&path, "SF43718").unwrap().is_stale(Duration::hours(24)));
    }

    #[test]
    fn test_row_list_with_bad_month_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fx_data.json");
        fs::write(&path, r#"[{"PeriodYear": 2025, "PeriodMonth": 13, "FX_EOM": 18.5}]"#).unwrap();
        let err = FxSeriesStore::load(&path, "SF43718").unwrap_err();
        assert!(matches!(err, PipelineError::Validation { .. }));
    }

    #[test]
    fn test_unrecognized_cache_reports_cache_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fx_data.json");
        fs::write(&path, r#"{"series_id": "SF43718", "rates": {}}"#).unwrap();
        let err = FxSeriesStore::load(&path, "SF43718").unwrap_err();
        assert!(err.to_string().contains("fetched_at"), "{}", err);
    }
}
