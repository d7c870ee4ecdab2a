// ⚠️ Error Taxonomy - Structural errors abort a source, data-quality issues do not
//
// Missing FX rates and zero rates are NOT errors: they travel with the enriched
// rows as `enrichment::ReasonCode` values.

use thiserror::Error;

/// Why a single report could not be extracted
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionReason {
    #[error("report is not in the report-to-category map")]
    UnmappedReport,

    #[error("no header row with period columns found in the first {scanned} rows")]
    HeaderNotFound { scanned: usize },

    #[error("cell at row {row}, column {column} is not numeric: {raw:?}")]
    NonNumericCell {
        row: usize,
        column: usize,
        raw: String,
    },

    #[error("unreadable workbook: {0}")]
    Unreadable(String),
}

/// Main error type for the pipeline library
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extraction failed for {report}: {reason}")]
    Extraction {
        report: String,
        reason: ExtractionReason,
    },

    #[error("unknown category label {label:?} in {source_name}")]
    UnknownCategory { label: String, source_name: String },

    #[error("unknown concept label {label:?} in {source_name}")]
    UnknownConcept { label: String, source_name: String },

    #[error("invalid {field} in {source_name}: {message}")]
    Validation {
        source_name: String,
        field: String,
        message: String,
    },

    #[error("FX fetch error: {0}")]
    Fetch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl PipelineError {
    pub fn extraction(report: impl Into<String>, reason: ExtractionReason) -> Self {
        PipelineError::Extraction {
            report: report.into(),
            reason,
        }
    }

    /// True for errors that only invalidate one source (the run may go on)
    pub fn is_source_scoped(&self) -> bool {
        matches!(self, PipelineError::Extraction { .. })
    }
}

/// Result alias for library operations
pub type Result<T> = std::result::Result<T, PipelineError>;
