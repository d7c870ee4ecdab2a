// 🧾 Record types - raw extraction output and the canonical record set
//
// RawRecord     = what a source said (labels unresolved, provenance attached)
// CanonicalRecord = validated, deduplicated, typed labels, ×1000 applied

use crate::entities::{Category, Concept};
use crate::period::PeriodKey;
use serde::{Deserialize, Deserializer, Serialize};

// ============================================================================
// PROVENANCE
// ============================================================================

/// Where a raw record came from. `rank` orders sources for last-source-wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// File or report name, used in diagnostics
    pub source_name: String,

    /// Precedence: higher rank overrides lower rank on key collision
    pub rank: usize,

    /// 0-based worksheet row for spreadsheet sources
    pub row: Option<usize>,

    /// 0-based worksheet column for spreadsheet sources
    pub column: Option<usize>,
}

impl Provenance {
    pub fn new(source_name: &str, rank: usize) -> Self {
        Provenance {
            source_name: source_name.to_string(),
            rank,
            row: None,
            column: None,
        }
    }

    pub fn at(mut self, row: usize, column: usize) -> Self {
        self.row = Some(row);
        self.column = Some(column);
        self
    }

    /// "Reporte-18 r12 c7" style locator for logs
    pub fn locator(&self) -> String {
        match (self.row, self.column) {
            (Some(r), Some(c)) => format!("{} r{} c{}", self.source_name, r, c),
            _ => self.source_name.clone(),
        }
    }
}

// ============================================================================
// RAW RECORD
// ============================================================================

/// Record as emitted by a source, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub entity: String,
    pub category_label: String,
    pub concept_label: String,
    pub period_year: i32,
    pub period_month: u32,
    /// Already in base units (×1000 applied by the extractor)
    pub value_local: f64,
    pub provenance: Provenance,
}

// ============================================================================
// CANONICAL RECORD
// ============================================================================

/// Unique key of the canonical set. Field order is the canonical sort order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey {
    pub category: Category,
    pub entity: String,
    pub concept: Concept,
    pub period: PeriodKey,
}

/// Validated holding record (value in local currency base units)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
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
}

impl CanonicalRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            category: self.category,
            entity: self.entity.clone(),
            concept: self.concept,
            period: self.period(),
        }
    }

    pub fn period(&self) -> PeriodKey {
        PeriodKey {
            year: self.period_year,
            month: self.period_month,
        }
    }
}

// ============================================================================
// SERDE HELPERS
// ============================================================================

/// Older exports wrote `"PeriodYear": "2024"` and `"PeriodMonth": "07"`
pub fn int_or_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: std::str::FromStr + TryFrom<i64>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IntOrString {
        Int(i64),
        Text(String),
    }

    match IntOrString::deserialize(deserializer)? {
        IntOrString::Int(n) => {
            T::try_from(n).map_err(|_| serde::de::Error::custom(format!("out of range: {}", n)))
        }
        IntOrString::Text(s) => s
            .trim()
            .parse::<T>()
            .map_err(|_| serde::de::Error::custom(format!("not an integer: {:?}", s))),
    }
}
