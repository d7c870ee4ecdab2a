// 📄 Raw Cell Region - in-memory view of one worksheet
//
// Extraction logic never touches calamine types: a workbook is loaded once into
// a CellGrid with ABSOLUTE coordinates (row 0 / column 0 = A1), then read-only
// lookups run against the grid. Tests build grids by hand.

use crate::error::{ExtractionReason, PipelineError, Result};
use crate::period::from_excel_serial;
use calamine::{open_workbook, Data, Reader, Xlsx, XlsxError};
use chrono::NaiveDate;
use std::path::Path;

// ============================================================================
// CELL
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
    /// Spreadsheet error value such as `#N/A` or `#DIV/0!`
    Error(String),
}

static EMPTY: Cell = Cell::Empty;

impl Cell {
    pub fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    /// Trimmed text content, `None` when blank or not text
    pub fn as_label(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => {
                let trimmed = s.trim();
                (!trimmed.is_empty()).then_some(trimmed)
            }
            _ => None,
        }
    }

    /// Text used in diagnostics
    pub fn display_raw(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) => n.to_string(),
            Cell::Date(d) => d.to_string(),
            Cell::Error(e) => e.clone(),
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) if s.trim().is_empty() => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => match from_excel_serial(dt.as_f64()) {
                Some(date) => Cell::Date(date),
                None => Cell::Number(dt.as_f64()),
            },
            Data::DateTimeIso(s) => s
                .get(..10)
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                .map(Cell::Date)
                .unwrap_or_else(|| Cell::Text(s.clone())),
            Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(e) => Cell::Error(format!("{:?}", e)),
        }
    }
}

// ============================================================================
// CELL GRID
// ============================================================================

/// Rectangular slice of a worksheet, row-major, absolute coordinates
#[derive(Debug, Clone, Default)]
pub struct CellGrid {
    rows: Vec<Vec<Cell>>,
}

impl CellGrid {
    pub fn from_rows(rows: Vec<Vec<Cell>>) -> Self {
        CellGrid { rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Width of the widest row
    pub fn column_count(&self) -> usize {
        self.rows.iter().map(|r| r.len()).max().unwrap_or(0)
    }

    /// Cell at (row, column); out-of-range positions read as empty
    pub fn get(&self, row: usize, column: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|r| r.get(column))
            .unwrap_or(&EMPTY)
    }

    pub fn row(&self, row: usize) -> &[Cell] {
        self.rows.get(row).map(|r| r.as_slice()).unwrap_or(&[])
    }

    /// Load the first worksheet of an `.xlsx` workbook.
    ///
    /// The file is opened read-only; nothing is written back.
    pub fn load_xlsx(path: &Path) -> Result<CellGrid> {
        let report = path.display().to_string();
        let unreadable = |msg: String| PipelineError::extraction(&report, ExtractionReason::Unreadable(msg));

        let mut workbook: Xlsx<_> = open_workbook(path).map_err(|e: XlsxError| unreadable(e.to_string()))?;

        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| unreadable("workbook has no worksheets".to_string()))?;

        let range = workbook
            .worksheet_range(&sheet_name)
            .map_err(|e| unreadable(format!("sheet {}: {}", sheet_name, e)))?;

        // calamine ranges start at the first used cell, not at A1
        let (row_offset, col_offset) = range
            .start()
            .map(|(r, c)| (r as usize, c as usize))
            .unwrap_or((0, 0));

        let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row_offset];
        for data_row in range.rows() {
            let mut row = vec![Cell::Empty; col_offset];
            row.extend(data_row.iter().map(Cell::from));
            rows.push(row);
        }

        Ok(CellGrid::from_rows(rows))
    }
}
