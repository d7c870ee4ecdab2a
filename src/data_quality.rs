// ✅ Data Quality Engine - per-record validation rules
//
// Critical = hard failure (record cannot enter the canonical set)
// Warning  = soft failure (record kept, issue reported; e.g. negative values,
//            which can be legitimate accounting adjustments)

use crate::record::{CanonicalRecord, Provenance};
use serde::{Deserialize, Serialize};

// ============================================================================
// VALIDATION RESULT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub rule_name: String,
    pub field: String,
    pub message: String,
    pub severity: Severity,
}

impl ValidationResult {
    pub fn pass(rule_name: &str, field: &str) -> Self {
        ValidationResult {
            passed: true,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: String::new(),
            severity: Severity::Info,
        }
    }

    pub fn fail(rule_name: &str, field: &str, message: &str, severity: Severity) -> Self {
        ValidationResult {
            passed: false,
            rule_name: rule_name.to_string(),
            field: field.to_string(),
            message: message.to_string(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Record is invalid and must not be stored
    Warning,  // Record is kept but flagged for review
    Info,
}

// ============================================================================
// QUALITY ISSUE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub rule_name: String,
    pub field: String,
    pub issue: String,
    /// Where the offending record came from
    pub source: String,
}

/// Issues found in one batch, split by severity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSummary {
    pub checked: usize,
    pub critical: Vec<QualityIssue>,
    pub warnings: Vec<QualityIssue>,
}

impl BatchSummary {
    pub fn has_critical_issues(&self) -> bool {
        !self.critical.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Checked {} records: {} critical, {} warnings",
            self.checked,
            self.critical.len(),
            self.warnings.len()
        )
    }
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

pub struct DataQualityEngine {
    /// Oldest accepted reporting year
    pub min_year: i32,

    /// Newest accepted reporting year (data vintage)
    pub max_year: i32,
}

impl DataQualityEngine {
    pub fn new(min_year: i32, max_year: i32) -> Self {
        DataQualityEngine { min_year, max_year }
    }

    /// Run every rule on one record
    pub fn validate(&self, record: &CanonicalRecord) -> Vec<ValidationResult> {
        vec![
            self.validate_entity(&record.entity),
            self.validate_month(record.period_month),
            self.validate_year(record.period_year),
            self.validate_value_finite(record.value_local),
            self.validate_value_sign(record.value_local),
        ]
    }

    /// Validate a batch; only failed rules are kept in the summary
    pub fn validate_batch<'a, I>(&self, records: I) -> BatchSummary
    where
        I: IntoIterator<Item = (&'a CanonicalRecord, &'a Provenance)>,
    {
        let mut summary = BatchSummary::default();

        for (record, provenance) in records {
            summary.checked += 1;
            for result in self.validate(record).into_iter().filter(|r| !r.passed) {
                let issue = QualityIssue {
                    severity: result.severity,
                    rule_name: result.rule_name,
                    field: result.field,
                    issue: result.message,
                    source: provenance.locator(),
                };
                match issue.severity {
                    Severity::Critical => summary.critical.push(issue),
                    Severity::Warning | Severity::Info => summary.warnings.push(issue),
                }
            }
        }

        summary
    }

    // ========================================================================
    // VALIDATION RULES
    // ========================================================================

    fn validate_entity(&self, entity: &str) -> ValidationResult {
        if entity.trim().is_empty() {
            return ValidationResult::fail("entity_not_empty", "entity", "Administrator is empty", Severity::Critical);
        }
        ValidationResult::pass("entity_not_empty", "entity")
    }

    fn validate_month(&self, month: u32) -> ValidationResult {
        if !(1..=12).contains(&month) {
            return ValidationResult::fail(
                "month_in_range",
                "periodMonth",
                &format!("Month {} outside 1..12", month),
                Severity::Critical,
            );
        }
        ValidationResult::pass("month_in_range", "periodMonth")
    }

    fn validate_year(&self, year: i32) -> ValidationResult {
        if year < self.min_year || year > self.max_year {
            return ValidationResult::fail(
                "year_in_range",
                "periodYear",
                &format!("Year {} outside {}..={}", year, self.min_year, self.max_year),
                Severity::Critical,
            );
        }
        ValidationResult::pass("year_in_range", "periodYear")
    }

    fn validate_value_finite(&self, value: f64) -> ValidationResult {
        if !value.is_finite() {
            return ValidationResult::fail(
                "value_finite",
                "valueLocal",
                &format!("Value {} is not finite", value),
                Severity::Critical,
            );
        }
        ValidationResult::pass("value_finite", "valueLocal")
    }

    fn validate_value_sign(&self, value: f64) -> ValidationResult {
        if value < 0.0 {
            return ValidationResult::fail(
                "value_non_negative",
                "valueLocal",
                &format!("Negative value {:.2} (possible adjustment)", value),
                Severity::Warning,
            );
        }
        ValidationResult::pass("value_non_negative", "valueLocal")
    }
}

// ============================================================================
// TESTS
// ============================================================================
