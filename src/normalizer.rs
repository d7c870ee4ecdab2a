// 🧹 Record Normalizer - raw records from every source → canonical record set
//
//   1. resolve labels (category aliases, concept spellings)
//   2. validate (critical issues abort, warnings are reported)
//   3. deduplicate on the unique key (last source wins)
//   4. summarize for pipeline smoke tests

use crate::data_quality::{DataQualityEngine, QualityIssue};
use crate::deduplication::{Collision, DeduplicationEngine, ResolutionPolicy};
use crate::entities::{Category, CategoryRegistry, Concept};
use crate::error::{PipelineError, Result};
use crate::period::PeriodKey;
use crate::record::{CanonicalRecord, Provenance, RawRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn};

// ============================================================================
// SUMMARY STATISTICS
// ============================================================================

/// Shape of a canonical record set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordSetStats {
    pub total_records: usize,
    pub distinct_entities: usize,
    pub distinct_categories: usize,
    pub distinct_concepts: usize,
    pub first_period: Option<PeriodKey>,
    pub last_period: Option<PeriodKey>,
    pub by_category: BTreeMap<Category, usize>,
    pub by_concept: BTreeMap<Concept, usize>,
    pub negative_values: usize,
}

impl RecordSetStats {
    pub fn from_records(records: &[CanonicalRecord]) -> Self {
        let mut entities = BTreeSet::new();
        let mut by_category = BTreeMap::new();
        let mut by_concept = BTreeMap::new();

        for record in records {
            entities.insert(record.entity.as_str());
            *by_category.entry(record.category).or_insert(0) += 1;
            *by_concept.entry(record.concept).or_insert(0) += 1;
        }

        RecordSetStats {
            total_records: records.len(),
            distinct_entities: entities.len(),
            distinct_categories: by_category.len(),
            distinct_concepts: by_concept.len(),
            first_period: records.iter().map(|r| r.period()).min(),
            last_period: records.iter().map(|r| r.period()).max(),
            by_category,
            by_concept,
            negative_values: records.iter().filter(|r| r.value_local < 0.0).count(),
        }
    }

    /// Every month between the first and last period, inclusive
    pub fn required_periods(&self) -> Vec<PeriodKey> {
        match (self.first_period, self.last_period) {
            (Some(first), Some(last)) => PeriodKey::range(first, last).collect(),
            _ => Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        let range = match (self.first_period, self.last_period) {
            (Some(first), Some(last)) => format!("{} to {}", first, last),
            _ => "empty".to_string(),
        };
        format!(
            "{} records, {} administrators, {} categories, {} concepts, periods {}",
            self.total_records,
            self.distinct_entities,
            self.distinct_categories,
            self.distinct_concepts,
            range
        )
    }
}

/// Everything a normalization pass produced besides the records
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationReport {
    pub input_records: usize,
    pub stats: RecordSetStats,
    pub collisions: Vec<Collision>,
    pub warnings: Vec<QualityIssue>,
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub struct RecordNormalizer {
    categories: CategoryRegistry,
    quality: DataQualityEngine,
    dedup: DeduplicationEngine,
}

impl RecordNormalizer {
    pub fn new(min_year: i32, max_year: i32) -> Self {
        RecordNormalizer {
            categories: CategoryRegistry::with_defaults(),
            quality: DataQualityEngine::new(min_year, max_year),
            dedup: DeduplicationEngine::new(),
        }
    }

    pub fn with_categories(mut self, categories: CategoryRegistry) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_policy(mut self, policy: ResolutionPolicy) -> Self {
        self.dedup = DeduplicationEngine::with_policy(policy);
        self
    }

    /// Map one raw record onto typed labels
    fn resolve(&self, raw: RawRecord) -> Result<(CanonicalRecord, Provenance)> {
        let category = self
            .categories
            .resolve(&raw.category_label)
            .ok_or_else(|| PipelineError::UnknownCategory {
                label: raw.category_label.clone(),
                source_name: raw.provenance.locator(),
            })?;

        let concept = Concept::from_label(&raw.concept_label).ok_or_else(|| PipelineError::UnknownConcept {
            label: raw.concept_label.clone(),
            source_name: raw.provenance.locator(),
        })?;

        let record = CanonicalRecord {
            entity: raw.entity.trim().to_string(),
            category,
            concept,
            period_year: raw.period_year,
            period_month: raw.period_month,
            value_local: raw.value_local,
        };

        Ok((record, raw.provenance))
    }

    /// Normalize the union of all sources.
    ///
    /// Input order matters only among records of equal source rank.
    pub fn normalize(&self, raw: Vec<RawRecord>) -> Result<(Vec<CanonicalRecord>, NormalizationReport)> {
        let input_records = raw.len();

        let resolved = raw
            .into_iter()
            .map(|r| self.resolve(r))
            .collect::<Result<Vec<_>>>()?;

        let quality = self
            .quality
            .validate_batch(resolved.iter().map(|(record, provenance)| (record, provenance)));

        for issue in &quality.warnings {
            warn!(source = %issue.source, rule = %issue.rule_name, "{}", issue.issue);
        }

        if let Some(first) = quality.critical.first() {
            for issue in &quality.critical {
                error!(source = %issue.source, rule = %issue.rule_name, "{}", issue.issue);
            }
            return Err(PipelineError::Validation {
                source_name: first.source.clone(),
                field: first.field.clone(),
                message: format!("{} ({} critical issues in total)", first.issue, quality.critical.len()),
            });
        }

        let outcome = self.dedup.deduplicate(resolved)?;
        let stats = RecordSetStats::from_records(&outcome.records);

        info!(
            input = input_records,
            unique = stats.total_records,
            collisions = outcome.collisions.len(),
            warnings = quality.warnings.len(),
            "normalization complete"
        );

        let report = NormalizationReport {
            input_records,
            stats,
            collisions: outcome.collisions,
            warnings: quality.warnings,
        };

        Ok((outcome.records, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(category: &str, entity: &str, month: u32, value: f64, source: &str, rank: usize) -> RawRecord {
        RawRecord {
            entity: entity.to_string(),
            category_label: category.to_string(),
            concept_label: "Total de Activo".to_string(),
            period_year: 2025,
            period_month: month,
            value_local: value,
            provenance: Provenance::new(source, rank),
        }
    }

    fn normalizer() -> RecordNormalizer {
        RecordNormalizer::new(2019, 2025)
    }

    #[test]
    fn test_alias_and_canonical_collide() {
        let input = vec![
            raw("Basica 55-59", "Azteca", 3, 100.0, "legacy.json", 0),
            raw("55-59", "Azteca", 3, 150.0, "Reporte-18", 18),
        ];
        let (records, report) = normalizer().normalize(input).unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].category, Category::Gen55_59);
        assert_eq!(records[0].value_local, 150.0);
        assert_eq!(report.collisions.len(), 1);
        assert_eq!(report.collisions[0].discarded.source_name, "legacy.json");
    }

    #[test]
    fn test_unknown_category_is_surfaced() {
        let input = vec![raw("Basica", "Azteca", 3, 1.0, "merged.json", 0)];
        match normalizer().normalize(input) {
            Err(PipelineError::UnknownCategory { label, source_name }) => {
                assert_eq!(label, "Basica");
                assert_eq!(source_name, "merged.json");
            }
            other => panic!("expected UnknownCategory, got {:?}", other.map(|(r, _)| r.len())),
        }
    }

    #[test]
    fn test_invalid_month_aborts() {
        let input = vec![raw("60-64", "Azteca", 13, 1.0, "legacy.json", 0)];
        assert!(matches!(
            normalizer().normalize(input),
            Err(PipelineError::Validation { .. })
        ));
    }

    #[test]
    fn test_negative_values_kept_with_warning() {
        let input = vec![raw("60-64", "Azteca", 1, -10.0, "Reporte-19", 19)];
        let (records, report) = normalizer().normalize(input).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.stats.negative_values, 1);
    }

    #[test]
    fn test_summary_statistics() {
        let mut input = vec![
            raw("60-64", "Azteca", 1, 1.0, "Reporte-19", 19),
            raw("60-64", "Coppel", 4, 1.0, "Reporte-19", 19),
            raw("Pensiones", "Azteca", 2, 1.0, "Reporte-16", 16),
        ];
        input[2].concept_label = "Inversión en Fondos Mutuos".to_string();

        let (_, report) = normalizer().normalize(input).unwrap();
        let stats = report.stats;
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.distinct_entities, 2);
        assert_eq!(stats.distinct_categories, 2);
        assert_eq!(stats.distinct_concepts, 2);
        assert_eq!(stats.first_period, PeriodKey::new(2025, 1));
        assert_eq!(stats.last_period, PeriodKey::new(2025, 4));
        assert_eq!(stats.required_periods().len(), 4);
    }

    #[test]
    fn test_keys_are_unique_and_sorted() {
        let input = vec![
            raw("60-64", "Coppel", 2, 1.0, "a", 1),
            raw("60-64", "Azteca", 2, 1.0, "a", 1),
            raw("60-64", "Coppel", 2, 5.0, "b", 2),
            raw("60-64", "Azteca", 1, 1.0, "a", 1),
        ];
        let (records, _) = normalizer().normalize(input).unwrap();
        let keys: Vec<_> = records.iter().map(|r| r.key()).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(keys, sorted);
        assert_eq!(records.len(), 3);
    }
}
