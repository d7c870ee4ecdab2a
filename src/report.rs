// 📊 Operator reports - CSV summaries written next to the outputs
//
//   rebuild_summary.csv    one row per report file: status + records extracted
//   coverage_summary.csv   records / administrators / period range per category and per concept
//   unmatched_periods.csv  periods with no FX rate and how many records they affect

use crate::enrichment::EnrichedRecord;
use crate::entities::ReportId;
use crate::error::Result;
use crate::period::PeriodKey;
use crate::record::CanonicalRecord;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

// ============================================================================
// REBUILD SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RebuildStatus {
    Success,
    FileNotFound,
    Failed(String),
}

impl fmt::Display for RebuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebuildStatus::Success => f.write_str("Success"),
            RebuildStatus::FileNotFound => f.write_str("File Not Found"),
            RebuildStatus::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

/// Outcome of extracting one report
#[derive(Debug, Clone, PartialEq)]
pub struct RebuildRow {
    pub report: ReportId,
    pub status: RebuildStatus,
    pub records_extracted: usize,
}

#[derive(Serialize)]
struct RebuildCsvRow<'a> {
    #[serde(rename = "Report_Number")]
    report_number: u32,
    #[serde(rename = "Siefore")]
    siefore: &'a str,
    #[serde(rename = "Status")]
    status: String,
    #[serde(rename = "Records_Extracted")]
    records_extracted: usize,
}

pub fn write_rebuild_summary(path: &Path, rows: &[RebuildRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(RebuildCsvRow {
            report_number: row.report.number(),
            siefore: row.report.category().as_str(),
            status: row.status.to_string(),
            records_extracted: row.records_extracted,
        })?;
    }
    writer.flush()?;
    Ok(())
}

// ============================================================================
// COVERAGE SUMMARY
// ============================================================================

/// One line of the coverage summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageRow {
    #[serde(rename = "Dimension")]
    pub dimension: &'static str,
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "Records")]
    pub records: usize,
    #[serde(rename = "Afores")]
    pub entities: usize,
    #[serde(rename = "First_Period")]
    pub first_period: String,
    #[serde(rename = "Last_Period")]
    pub last_period: String,
}

#[derive(Default)]
struct Bucket<'a> {
    records: usize,
    entities: BTreeSet<&'a str>,
    first: Option<PeriodKey>,
    last: Option<PeriodKey>,
}

impl<'a> Bucket<'a> {
    fn add(&mut self, record: &'a CanonicalRecord) {
        let period = record.period();
        self.records += 1;
        self.entities.insert(record.entity.as_str());
        self.first = Some(self.first.map_or(period, |p| p.min(period)));
        self.last = Some(self.last.map_or(period, |p| p.max(period)));
    }

    fn into_row(self, dimension: &'static str, value: String) -> CoverageRow {
        CoverageRow {
            dimension,
            value,
            records: self.records,
            entities: self.entities.len(),
            first_period: self.first.map(|p| p.to_string()).unwrap_or_default(),
            last_period: self.last.map(|p| p.to_string()).unwrap_or_default(),
        }
    }
}

/// Per-category rows (declaration order) followed by per-concept rows
pub fn coverage_rows(records: &[CanonicalRecord]) -> Vec<CoverageRow> {
    let mut by_category: BTreeMap<_, Bucket> = BTreeMap::new();
    let mut by_concept: BTreeMap<_, Bucket> = BTreeMap::new();

    for record in records {
        by_category.entry(record.category).or_default().add(record);
        by_concept.entry(record.concept).or_default().add(record);
    }

    let mut rows: Vec<CoverageRow> = by_category
        .into_iter()
        .map(|(category, bucket)| bucket.into_row("Siefore", category.to_string()))
        .collect();
    rows.extend(
        by_concept
            .into_iter()
            .map(|(concept, bucket)| bucket.into_row("Concept", concept.to_string())),
    );
    rows
}

pub fn write_coverage_summary(path: &Path, records: &[CanonicalRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for row in coverage_rows(records) {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

// ============================================================================
// UNMATCHED FX PERIODS
// ============================================================================

#[derive(Serialize)]
struct UnmatchedCsvRow {
    #[serde(rename = "Period")]
    period: String,
    #[serde(rename = "Reason")]
    reason: String,
    #[serde(rename = "Records_Affected")]
    records_affected: usize,
}

pub fn write_unmatched_periods(path: &Path, enriched: &[EnrichedRecord]) -> Result<()> {
    let mut affected: BTreeMap<(PeriodKey, String), usize> = BTreeMap::new();
    for record in enriched {
        if let Some(reason) = record.reason {
            *affected.entry((record.period(), reason.to_string())).or_insert(0) += 1;
        }
    }

    let mut writer = csv::Writer::from_path(path)?;
    for ((period, reason), records_affected) in affected {
        writer.serialize(UnmatchedCsvRow {
            period: period.to_string(),
            reason,
            records_affected,
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Category, Concept};
    use std::fs;

    fn record(entity: &str, category: Category, concept: Concept, month: u32) -> CanonicalRecord {
        CanonicalRecord {
            entity: entity.to_string(),
            category,
            concept,
            period_year: 2025,
            period_month: month,
            value_local: 1.0,
        }
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(RebuildStatus::Success.to_string(), "Success");
        assert_eq!(RebuildStatus::FileNotFound.to_string(), "File Not Found");
        assert_eq!(
            RebuildStatus::Failed("header row not found".to_string()).to_string(),
            "Failed: header row not found"
        );
    }

    #[test]
    fn test_rebuild_summary_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rebuild_summary.csv");
        let rows = vec![
            RebuildRow {
                report: ReportId::new(16).unwrap(),
                status: RebuildStatus::Success,
                records_extracted: 120,
            },
            RebuildRow {
                report: ReportId::new(17).unwrap(),
                status: RebuildStatus::FileNotFound,
                records_extracted: 0,
            },
        ];
        write_rebuild_summary(&path, &rows).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Report_Number,Siefore,Status,Records_Extracted");
        assert_eq!(lines[1], "16,Pensiones,Success,120");
        assert_eq!(lines[2], "17,Inicial,File Not Found,0");
    }

    #[test]
    fn test_coverage_rows() {
        let records = vec![
            record("Azteca", Category::Gen60_64, Concept::TotalAssets, 3),
            record("Coppel", Category::Gen60_64, Concept::TotalAssets, 1),
            record("Azteca", Category::Pensiones, Concept::MutualFunds, 2),
        ];
        let rows = coverage_rows(&records);

        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].value, "Pensiones");
        assert_eq!(rows[1].value, "60-64");
        assert_eq!(rows[1].records, 2);
        assert_eq!(rows[1].entities, 2);
        assert_eq!(rows[1].first_period, "2025-01");
        assert_eq!(rows[1].last_period, "2025-03");
        assert_eq!(rows[2].dimension, "Concept");
        assert_eq!(rows[2].value, "Total de Activo");
    }
}
