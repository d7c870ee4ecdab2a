// 🔗 Enrichment Joiner - canonical records × FX series → enriched records
//
// Every canonical record yields exactly one enriched record:
//   rate found, non-zero → valueUSD = valueMXN / FX_EOM
//   rate found, zero     → FX_EOM kept, valueUSD null, reason ZERO_RATE
//   no rate              → FX_EOM null, valueUSD null, reason NO_RATE_FOR_PERIOD
// Partial enrichment is a reportable outcome, never a failure.

use crate::entities::{Category, Concept};
use crate::fx::FxSeriesStore;
use crate::period::PeriodKey;
use crate::record::{int_or_string, CanonicalRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    NoRateForPeriod,
    ZeroRate,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::NoRateForPeriod => "NO_RATE_FOR_PERIOD",
            ReasonCode::ZeroRate => "ZERO_RATE",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ENRICHED RECORD
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    #[serde(rename = "Afore")]
    pub entity: String,

    #[serde(rename = "Siefore")]
    pub category: Category,

    #[serde(rename = "Concept")]
    pub concept: Concept,

    #[serde(rename = "PeriodYear", deserialize_with = "int_or_string")]
    pub period_year: i32,

    #[serde(rename = "PeriodMonth", deserialize_with = "int_or_string")]
    pub period_month: u32,

    #[serde(rename = "valueMXN")]
    pub value_local: f64,

    /// Local-currency units per foreign unit at month end
    #[serde(rename = "FX_EOM")]
    pub fx_rate: Option<f64>,

    #[serde(rename = "valueUSD")]
    pub value_foreign: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
}

impl EnrichedRecord {
    fn from_canonical(record: &CanonicalRecord, fx_rate: Option<f64>, value_foreign: Option<f64>, reason: Option<ReasonCode>) -> Self {
        EnrichedRecord {
            entity: record.entity.clone(),
            category: record.category,
            concept: record.concept,
            period_year: record.period_year,
            period_month: record.period_month,
            value_local: record.value_local,
            fx_rate,
            value_foreign,
            reason,
        }
    }

    pub fn period(&self) -> PeriodKey {
        PeriodKey {
            year: self.period_year,
            month: self.period_month,
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.value_foreign.is_some()
    }

    /// The canonical fields without the FX columns
    pub fn canonical(&self) -> CanonicalRecord {
        CanonicalRecord {
            entity: self.entity.clone(),
            category: self.category,
            concept: self.concept,
            period_year: self.period_year,
            period_month: self.period_month,
            value_local: self.value_local,
        }
    }
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentSummary {
    pub total_records: usize,
    pub enriched: usize,
    pub missing_rate: usize,
    pub zero_rate: usize,
    /// Distinct periods with no rate, ascending
    pub unmatched_periods: Vec<PeriodKey>,
    pub fx_min: Option<f64>,
    pub fx_max: Option<f64>,
    pub fx_mean: Option<f64>,
    pub fx_median: Option<f64>,
    pub total_local: f64,
    /// Sum over enriched records only
    pub total_foreign: f64,
}

impl EnrichmentSummary {
    pub fn is_complete(&self) -> bool {
        self.enriched == self.total_records
    }

    pub fn summary(&self) -> String {
        format!(
            "{} records: {} enriched, {} missing rate, {} zero rate, {} unmatched periods",
            self.total_records,
            self.enriched,
            self.missing_rate,
            self.zero_rate,
            self.unmatched_periods.len()
        )
    }
}

fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

// ============================================================================
// JOINER
// ============================================================================

/// Join every record with the FX series. Output order follows input order.
pub fn enrich(records: &[CanonicalRecord], fx: &FxSeriesStore) -> (Vec<EnrichedRecord>, EnrichmentSummary) {
    let mut out = Vec::with_capacity(records.len());
    let mut summary = EnrichmentSummary {
        total_records: records.len(),
        ..EnrichmentSummary::default()
    };
    let mut unmatched = BTreeSet::new();
    let mut record_rates = Vec::new();

    for record in records {
        summary.total_local += record.value_local;
        let period = record.period();

        let enriched = match fx.get(period) {
            None => {
                summary.missing_rate += 1;
                unmatched.insert(period);
                EnrichedRecord::from_canonical(record, None, None, Some(ReasonCode::NoRateForPeriod))
            }
            Some(rate) if rate == 0.0 => {
                summary.zero_rate += 1;
                warn!(period = %period, entity = %record.entity, "zero FX rate, foreign value left empty");
                EnrichedRecord::from_canonical(record, Some(rate), None, Some(ReasonCode::ZeroRate))
            }
            Some(rate) => {
                let value_foreign = record.value_local / rate;
                summary.enriched += 1;
                summary.total_foreign += value_foreign;
                record_rates.push(rate);
                EnrichedRecord::from_canonical(record, Some(rate), Some(value_foreign), None)
            }
        };
        out.push(enriched);
    }

    for period in &unmatched {
        warn!(period = %period, series = %fx.series_id(), "no FX rate for period");
    }
    summary.unmatched_periods = unmatched.into_iter().collect();

    record_rates.sort_by(|a, b| a.total_cmp(b));
    summary.fx_min = record_rates.first().copied();
    summary.fx_max = record_rates.last().copied();
    summary.fx_median = median(&record_rates);
    if !record_rates.is_empty() {
        summary.fx_mean = Some(record_rates.iter().sum::<f64>() / record_rates.len() as f64);
    }

    info!(
        total = summary.total_records,
        enriched = summary.enriched,
        missing_rate = summary.missing_rate,
        zero_rate = summary.zero_rate,
        "enrichment complete"
    );

    (out, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn key(year: i32, month: u32) -> PeriodKey {
        PeriodKey::new(year, month).unwrap()
    }

    fn record(entity: &str, month: u32, value: f64) -> CanonicalRecord {
        CanonicalRecord {
            entity: entity.to_string(),
            category: Category::Gen60_64,
            concept: Concept::TotalAssets,
            period_year: 2025,
            period_month: month,
            value_local: value,
        }
    }

    fn store(rates: &[(u32, f64)]) -> FxSeriesStore {
        let rates: BTreeMap<PeriodKey, f64> = rates.iter().map(|(m, r)| (key(2025, *m), *r)).collect();
        FxSeriesStore::from_rates("SF43718", rates, Utc::now())
    }

    #[test]
    fn test_divides_by_month_end_rate() {
        let (out, summary) = enrich(&[record("Azteca", 8, 18_600.0)], &store(&[(8, 18.6)]));
        assert_eq!(out.len(), 1);
        assert_relative_eq!(out[0].value_foreign.unwrap(), 1_000.0, epsilon = 1e-9);
        assert_eq!(out[0].fx_rate, Some(18.6));
        assert_eq!(out[0].reason, None);
        assert!(summary.is_complete());
    }

    #[test]
    fn test_gap_month_is_reported_not_fatal() {
        let records = vec![
            record("Azteca", 8, 100.0),
            record("Azteca", 9, 100.0),
            record("Coppel", 9, 100.0),
        ];
        let (out, summary) = enrich(&records, &store(&[(7, 18.7), (8, 18.6)]));

        assert_eq!(out.len(), records.len());
        assert_eq!(summary.enriched, 1);
        assert_eq!(summary.missing_rate, 2);
        assert_eq!(summary.unmatched_periods, vec![key(2025, 9)]);
        for r in out.iter().filter(|r| r.period() == key(2025, 9)) {
            assert_eq!(r.fx_rate, None);
            assert_eq!(r.value_foreign, None);
            assert_eq!(r.reason, Some(ReasonCode::NoRateForPeriod));
        }
    }

    #[test]
    fn test_zero_rate_emits_record_with_reason() {
        let (out, summary) = enrich(&[record("Azteca", 8, 100.0)], &store(&[(8, 0.0)]));
        assert_eq!(out[0].fx_rate, Some(0.0));
        assert_eq!(out[0].value_foreign, None);
        assert_eq!(out[0].reason, Some(ReasonCode::ZeroRate));
        assert_eq!(summary.zero_rate, 1);
        assert!(summary.unmatched_periods.is_empty());
    }

    #[test]
    fn test_fx_statistics() {
        let records = vec![record("A", 1, 10.0), record("B", 2, 10.0), record("C", 3, 10.0)];
        let (_, summary) = enrich(&records, &store(&[(1, 17.0), (2, 20.0), (3, 18.0)]));
        assert_eq!(summary.fx_min, Some(17.0));
        assert_eq!(summary.fx_max, Some(20.0));
        assert_eq!(summary.fx_median, Some(18.0));
        assert_relative_eq!(summary.fx_mean.unwrap(), 55.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(summary.total_local, 30.0);
    }

    #[test]
    fn test_serialized_field_names() {
        let (out, _) = enrich(&[record("Azteca", 9, 1.0)], &store(&[]));
        let json = serde_json::to_value(&out[0]).unwrap();
        assert_eq!(json["FX_EOM"], serde_json::Value::Null);
        assert_eq!(json["valueUSD"], serde_json::Value::Null);
        assert_eq!(json["reason"], "NO_RATE_FOR_PERIOD");
        assert_eq!(json["Siefore"], "60-64");
    }
}
