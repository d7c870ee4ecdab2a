// 🏗️ Spreadsheet Extractor - one report in, raw holding records out
//
// Report layout (one worksheet):
//
//   row h   : ...  | <label col> | ... | Ene-2024 | Feb-2024 | ...   ← header
//   row c   :      | Total de Activo  |          |          |
//   row c+1 :      | Afore A          |   1,234.5|   1,240.0|        ← values in thousands
//   ...            (up to N administrator rows per concept block)
//   row d   :      | Inversiones Tercerizadas ...
//
// Blank cells produce NO record (absence ≠ reported zero).

use crate::entities::report::report_number_from_path;
use crate::entities::ReportId;
use crate::entities::Concept;
use crate::error::{ExtractionReason, PipelineError, Result};
use crate::period::{parse_period_header, PeriodKey};
use crate::record::{Provenance, RawRecord};
use crate::sheet::{Cell, CellGrid};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Source files store values in thousands of the local currency
pub const UNIT_MULTIPLIER: f64 = 1000.0;

/// Cell texts that mean "no data reported"
static ABSENCE_MARKERS: &[&str] = &["n/a", "na", "-", "--", "nan", "none", "nd", "n.d.", "n/d"];

// ============================================================================
// LAYOUT
// ============================================================================

/// Fixed geometry of the report worksheets (0-based indices)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetLayout {
    /// Column holding concept and administrator labels
    pub label_column: usize,

    /// First column that may carry a period header
    pub first_value_column: usize,

    /// Row checked first when looking for the header
    pub header_row_hint: usize,

    /// How many rows from the top are scanned if the hint misses
    pub header_scan_rows: usize,

    /// Maximum administrator rows under a concept label
    pub entities_per_concept: usize,
}

impl Default for SheetLayout {
    fn default() -> Self {
        SheetLayout {
            label_column: 1,
            first_value_column: 4,
            header_row_hint: 8,
            header_scan_rows: 30,
            entities_per_concept: 10,
        }
    }
}

/// Located header row and its period columns
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderRow {
    pub row: usize,
    pub periods: Vec<(usize, PeriodKey)>,
}

// ============================================================================
// TRAITS
// ============================================================================

/// ReportParser - Core trait
///
/// Parsing must never modify the source file.
pub trait ReportParser: Send + Sync {
    /// Parse a report file and return raw records
    fn parse(&self, file_path: &Path) -> Result<Vec<RawRecord>>;

    /// Report this parser is configured for
    fn report(&self) -> ReportId;

    /// Parser version (for provenance tracking)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

/// FileValidator - Optional capability: cheap check before opening a file
pub trait FileValidator {
    fn can_parse(&self, file_path: &Path) -> bool;
}

// ============================================================================
// FACTORY FUNCTIONS
// ============================================================================

/// Detect the report from a file name such as `Reporte-18.xlsx`.
///
/// Fails with `UnmappedReport` if the name carries no report number or the
/// number is not one of the 11 mapped reports.
pub fn detect_report(file_path: &Path) -> Result<ReportId> {
    let name = file_path.display().to_string();
    report_number_from_path(file_path)
        .and_then(ReportId::new)
        .ok_or_else(|| PipelineError::extraction(name, ExtractionReason::UnmappedReport))
}

/// Get a parser for a report
pub fn get_parser(report: ReportId, layout: SheetLayout) -> Box<dyn ReportParser> {
    Box::new(SieforeReportParser::new(report, layout))
}

// ============================================================================
// SIEFORE REPORT PARSER
// ============================================================================

pub struct SieforeReportParser {
    report: ReportId,
    layout: SheetLayout,
    rank: usize,
}

impl SieforeReportParser {
    pub fn new(report: ReportId, layout: SheetLayout) -> Self {
        SieforeReportParser {
            report,
            layout,
            rank: report.number() as usize,
        }
    }

    /// Override the dedup precedence of records from this parser
    pub fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    fn fail(&self, reason: ExtractionReason) -> PipelineError {
        PipelineError::extraction(self.report.to_string(), reason)
    }

    /// Extract every (administrator × concept × period) value from a loaded grid
    pub fn extract(&self, grid: &CellGrid) -> Result<Vec<RawRecord>> {
        let header = locate_header(grid, &self.layout)
            .ok_or_else(|| self.fail(ExtractionReason::HeaderNotFound {
                scanned: self.layout.header_scan_rows,
            }))?;
        debug!(report = %self.report, row = header.row, periods = header.periods.len(), "header located");

        let concept_rows = locate_concepts(grid, &self.layout, header.row);
        let category = self.report.category();
        let source_name = self.report.to_string();
        let mut records = Vec::new();

        for concept in Concept::ALL {
            let Some(&(_, concept_row)) = concept_rows.iter().find(|(c, _)| *c == concept) else {
                warn!(report = %self.report, concept = %concept, "concept not found, skipping");
                continue;
            };

            let block_end = (concept_row + 1 + self.layout.entities_per_concept).min(grid.row_count());
            for row in (concept_row + 1)..block_end {
                // A shorter block ends at the next concept label
                if concept_rows.iter().any(|(_, r)| *r == row) {
                    break;
                }

                let Some(entity) = grid.get(row, self.layout.label_column).as_label() else {
                    continue;
                };

                for &(column, period) in &header.periods {
                    let cell = grid.get(row, column);
                    let value = parse_value(cell).map_err(|_| {
                        self.fail(ExtractionReason::NonNumericCell {
                            row,
                            column,
                            raw: cell.display_raw(),
                        })
                    })?;

                    let Some(value) = value else { continue };

                    records.push(RawRecord {
                        entity: entity.to_string(),
                        category_label: category.as_str().to_string(),
                        concept_label: concept.as_str().to_string(),
                        period_year: period.year,
                        period_month: period.month,
                        value_local: value * UNIT_MULTIPLIER,
                        provenance: Provenance::new(&source_name, self.rank).at(row, column),
                    });
                }
            }
        }

        Ok(records)
    }
}

impl ReportParser for SieforeReportParser {
    fn parse(&self, file_path: &Path) -> Result<Vec<RawRecord>> {
        let grid = CellGrid::load_xlsx(file_path)?;
        let records = self.extract(&grid)?;
        info!(
            report = %self.report,
            category = %self.report.category(),
            records = records.len(),
            "report extracted"
        );
        Ok(records)
    }

    fn report(&self) -> ReportId {
        self.report
    }
}

impl FileValidator for SieforeReportParser {
    fn can_parse(&self, file_path: &Path) -> bool {
        let is_xlsx = file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("xlsx"))
            .unwrap_or(false);
        is_xlsx && report_number_from_path(file_path) == Some(self.report.number())
    }
}

// ============================================================================
// GRID SCANNING
// ============================================================================

/// Period carried by a header cell, if any
pub fn period_from_cell(cell: &Cell) -> Option<PeriodKey> {
    match cell {
        Cell::Text(s) => parse_period_header(s),
        Cell::Date(d) => Some(PeriodKey::from_date(*d)),
        _ => None,
    }
}

fn header_periods(grid: &CellGrid, layout: &SheetLayout, row: usize) -> Vec<(usize, PeriodKey)> {
    grid.row(row)
        .iter()
        .enumerate()
        .skip(layout.first_value_column)
        .filter_map(|(col, cell)| period_from_cell(cell).map(|p| (col, p)))
        .collect()
}

/// Header = first row (hint row first, then top-down scan) with at least one
/// period column at or after `first_value_column`
pub fn locate_header(grid: &CellGrid, layout: &SheetLayout) -> Option<HeaderRow> {
    let scan_end = layout.header_scan_rows.min(grid.row_count());
    std::iter::once(layout.header_row_hint)
        .chain(0..scan_end)
        .filter(|row| *row < grid.row_count())
        .map(|row| HeaderRow {
            row,
            periods: header_periods(grid, layout, row),
        })
        .find(|header| !header.periods.is_empty())
}

/// First label row below the header for each concept, in row order
pub fn locate_concepts(grid: &CellGrid, layout: &SheetLayout, header_row: usize) -> Vec<(Concept, usize)> {
    let mut found: Vec<(Concept, usize)> = Vec::new();
    for row in (header_row + 1)..grid.row_count() {
        let Some(label) = grid.get(row, layout.label_column).as_label() else {
            continue;
        };
        if let Some(concept) = Concept::find_in_label(label) {
            if !found.iter().any(|(c, _)| *c == concept) {
                found.push((concept, row));
            }
        }
    }
    found
}

/// Numeric value of a data cell in source units (thousands).
///
/// `Ok(None)` = no data reported (blank, absence marker, spreadsheet error).
/// `Err(())` = something that should have been a number.
pub fn parse_value(cell: &Cell) -> std::result::Result<Option<f64>, ()> {
    match cell {
        Cell::Empty | Cell::Error(_) => Ok(None),
        Cell::Number(n) if n.is_finite() => Ok(Some(*n)),
        Cell::Number(_) | Cell::Date(_) => Err(()),
        Cell::Text(raw) => parse_numeric_text(raw),
    }
}

fn parse_numeric_text(raw: &str) -> std::result::Result<Option<f64>, ()> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{A0}' && *c != ',' && *c != '$')
        .collect();

    if cleaned.is_empty() {
        return Ok(None);
    }

    let lower = cleaned.to_lowercase();
    if ABSENCE_MARKERS.contains(&lower.as_str()) {
        return Ok(None);
    }

    // Accounting negative: (12.5) → -12.5
    let (negative, digits) = match lower.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, lower.as_str()),
    };

    // Rust accepts "inf"/"nan" spellings; reports never mean them
    if !digits.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e')) {
        return Err(());
    }

    let value: f64 = digits.parse().map_err(|_| ())?;
    if !value.is_finite() {
        return Err(());
    }

    Ok(Some(if negative { -value } else { value }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Category;

    fn t(s: &str) -> Cell {
        Cell::text(s)
    }

    fn n(v: f64) -> Cell {
        Cell::Number(v)
    }

    /// Two-period report with a concept block of two administrators and a
    /// second concept block with one administrator
    fn sample_grid() -> CellGrid {
        let e = || Cell::Empty;
        let mut rows: Vec<Vec<Cell>> = (0..8).map(|_| vec![]).collect();
        rows.push(vec![e(), t("Concepto"), e(), e(), t("Jul-2025"), t("Ago-2025")]); // 8
        rows.push(vec![e(), t("Total de Activo")]); // 9
        rows.push(vec![e(), t("Azteca"), e(), e(), n(1.5), t("2,000.25")]); // 10
        rows.push(vec![e(), t("Coppel"), e(), e(), t("   "), n(0.0)]); // 11
        rows.push(vec![e(), t("Inversiones Tercerizadas")]); // 12
        rows.push(vec![e(), t("Azteca"), e(), e(), t("N/A"), n(3.0)]); // 13
        CellGrid::from_rows(rows)
    }

    fn parser() -> SieforeReportParser {
        SieforeReportParser::new(ReportId::new(19).unwrap(), SheetLayout::default())
    }

    #[test]
    fn test_detect_report() {
        let report = detect_report(Path::new("files/Reporte-19.xlsx")).unwrap();
        assert_eq!(report.category(), Category::Gen60_64);
    }

    #[test]
    fn test_detect_report_unmapped() {
        let err = detect_report(Path::new("Reporte-40.xlsx")).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Extraction { reason: ExtractionReason::UnmappedReport, .. }
        ));
        assert!(detect_report(Path::new("notes.xlsx")).is_err());
    }

    #[test]
    fn test_locate_header_with_hint() {
        let header = locate_header(&sample_grid(), &SheetLayout::default()).unwrap();
        assert_eq!(header.row, 8);
        assert_eq!(header.periods.len(), 2);
        assert_eq!(header.periods[0], (4, PeriodKey::new(2025, 7).unwrap()));
    }

    #[test]
    fn test_locate_header_scans_when_hint_misses() {
        let rows = vec![
            vec![],
            vec![],
            vec![Cell::Empty, t("Concepto"), Cell::Empty, Cell::Empty, t("Ene-2024")],
        ];
        let header = locate_header(&CellGrid::from_rows(rows), &SheetLayout::default()).unwrap();
        assert_eq!(header.row, 2);
    }

    #[test]
    fn test_extract_applies_unit_conversion() {
        let records = parser().extract(&sample_grid()).unwrap();
        let azteca_aug = records
            .iter()
            .find(|r| r.entity == "Azteca" && r.period_month == 8 && r.concept_label == "Total de Activo")
            .unwrap();
        assert_eq!(azteca_aug.value_local, 2_000.25 * 1000.0);
        assert_eq!(azteca_aug.category_label, "60-64");
        assert_eq!(azteca_aug.provenance.row, Some(10));
    }

    #[test]
    fn test_blank_cells_produce_no_record() {
        let records = parser().extract(&sample_grid()).unwrap();
        // Azteca: 2 + Coppel: 1 (blank July skipped, zero August kept) + Tercerizadas: 1
        assert_eq!(records.len(), 4);
        assert!(!records
            .iter()
            .any(|r| r.entity == "Coppel" && r.period_month == 7));
        let coppel_aug = records.iter().find(|r| r.entity == "Coppel").unwrap();
        assert_eq!(coppel_aug.value_local, 0.0);
    }

    #[test]
    fn test_block_stops_at_next_concept() {
        let records = parser().extract(&sample_grid()).unwrap();
        let outsourced: Vec<_> = records
            .iter()
            .filter(|r| r.concept_label == "Inversiones Tercerizadas")
            .collect();
        assert_eq!(outsourced.len(), 1);
        assert_eq!(outsourced[0].value_local, 3000.0);
    }

    #[test]
    fn test_missing_header_is_an_error() {
        let grid = CellGrid::from_rows(vec![vec![t("nothing here")]]);
        let err = parser().extract(&grid).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Extraction { reason: ExtractionReason::HeaderNotFound { .. }, .. }
        ));
    }

    #[test]
    fn test_non_numeric_cell_is_an_error() {
        let mut rows: Vec<Vec<Cell>> = (0..8).map(|_| vec![]).collect();
        rows.push(vec![Cell::Empty, t("Concepto"), Cell::Empty, Cell::Empty, t("Jul-2025")]);
        rows.push(vec![Cell::Empty, t("Total de Activo")]);
        rows.push(vec![Cell::Empty, t("Azteca"), Cell::Empty, Cell::Empty, t("12 mil")]);
        let err = parser().extract(&CellGrid::from_rows(rows)).unwrap_err();
        match err {
            PipelineError::Extraction {
                reason: ExtractionReason::NonNumericCell { row, column, raw },
                ..
            } => {
                assert_eq!((row, column), (10, 4));
                assert_eq!(raw, "12 mil");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_parse_value_variants() {
        assert_eq!(parse_value(&Cell::Empty), Ok(None));
        assert_eq!(parse_value(&t(" 1,234.5 ")), Ok(Some(1234.5)));
        assert_eq!(parse_value(&t("(12.5)")), Ok(Some(-12.5)));
        assert_eq!(parse_value(&t("-")), Ok(None));
        assert_eq!(parse_value(&t("nan")), Ok(None));
        assert_eq!(parse_value(&t("inf")), Err(()));
        assert_eq!(parse_value(&Cell::Error("NA".to_string())), Ok(None));
        assert_eq!(parse_value(&t("\u{A0}7")), Ok(Some(7.0)));
    }

    #[test]
    fn test_can_parse_only_own_report() {
        let p = parser();
        assert!(p.can_parse(Path::new("Reporte-19.xlsx")));
        assert!(!p.can_parse(Path::new("Reporte-18.xlsx")));
        assert!(!p.can_parse(Path::new("Reporte-19.csv")));
    }
}
