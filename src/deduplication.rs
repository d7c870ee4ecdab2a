// 🔍 Deduplication Engine - enforce the canonical unique key
//
// Key: (category, entity, concept, period).
// Policy (default): last source wins. Records are replayed in ascending source
// rank, arrival order breaking ties; a later record replaces an earlier one.
// Every replacement is logged and returned as a Collision.

use crate::error::{PipelineError, Result};
use crate::record::{CanonicalRecord, Provenance, RecordKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

// ============================================================================
// RESOLUTION POLICY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionPolicy {
    /// Higher-ranked (more recently loaded) source replaces the earlier record
    LastSourceWins,

    /// Any collision aborts normalization
    RejectDuplicates,
}

impl Default for ResolutionPolicy {
    fn default() -> Self {
        ResolutionPolicy::LastSourceWins
    }
}

// ============================================================================
// COLLISION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collision {
    /// "60-64 | Profuturo | Total de Activo | 2025-08"
    pub key: String,
    pub kept: Provenance,
    pub discarded: Provenance,
    pub kept_value: f64,
    pub discarded_value: f64,
}

impl Collision {
    pub fn values_differ(&self) -> bool {
        (self.kept_value - self.discarded_value).abs() > 1e-9
    }
}

fn describe_key(key: &RecordKey) -> String {
    format!("{} | {} | {} | {}", key.category, key.entity, key.concept, key.period)
}

// ============================================================================
// DEDUPLICATION ENGINE
// ============================================================================

pub struct DeduplicationEngine {
    pub policy: ResolutionPolicy,
}

/// Output of a dedup pass: unique records in canonical order + collision log
#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub records: Vec<CanonicalRecord>,
    pub collisions: Vec<Collision>,
}

impl DeduplicationEngine {
    pub fn new() -> Self {
        DeduplicationEngine {
            policy: ResolutionPolicy::LastSourceWins,
        }
    }

    pub fn with_policy(policy: ResolutionPolicy) -> Self {
        DeduplicationEngine { policy }
    }

    /// Resolve key collisions. Must run single-threaded over the merged
    /// input so that the outcome depends only on (rank, arrival order).
    pub fn deduplicate(&self, records: Vec<(CanonicalRecord, Provenance)>) -> Result<DedupOutcome> {
        let mut ordered: Vec<(usize, CanonicalRecord, Provenance)> = records
            .into_iter()
            .enumerate()
            .map(|(arrival, (record, provenance))| (arrival, record, provenance))
            .collect();
        ordered.sort_by_key(|(arrival, _, provenance)| (provenance.rank, *arrival));

        let mut unique: BTreeMap<RecordKey, (CanonicalRecord, Provenance)> = BTreeMap::new();
        let mut collisions = Vec::new();

        for (_, record, provenance) in ordered {
            let key = record.key();

            if let Some((previous, previous_provenance)) = unique.get(&key) {
                if self.policy == ResolutionPolicy::RejectDuplicates {
                    return Err(PipelineError::Validation {
                        source_name: provenance.locator(),
                        field: "key".to_string(),
                        message: format!(
                            "duplicate of {} ({})",
                            describe_key(&key),
                            previous_provenance.locator()
                        ),
                    });
                }

                let collision = Collision {
                    key: describe_key(&key),
                    kept: provenance.clone(),
                    discarded: previous_provenance.clone(),
                    kept_value: record.value_local,
                    discarded_value: previous.value_local,
                };
                warn!(
                    key = %collision.key,
                    kept = %collision.kept.locator(),
                    discarded = %collision.discarded.locator(),
                    values_differ = collision.values_differ(),
                    "duplicate key resolved"
                );
                collisions.push(collision);
            }

            unique.insert(key, (record, provenance));
        }

        Ok(DedupOutcome {
            records: unique.into_values().map(|(record, _)| record).collect(),
            collisions,
        })
    }
}

impl Default for DeduplicationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Category, Concept};

    fn create_test_record(entity: &str, category: Category, month: u32, value: f64) -> CanonicalRecord {
        CanonicalRecord {
            entity: entity.to_string(),
            category,
            concept: Concept::TotalAssets,
            period_year: 2025,
            period_month: month,
            value_local: value,
        }
    }

    #[test]
    fn test_no_collisions() {
        let engine = DeduplicationEngine::new();
        let input = vec![
            (create_test_record("Azteca", Category::Gen55_59, 1, 1.0), Provenance::new("a", 1)),
            (create_test_record("Azteca", Category::Gen55_59, 2, 2.0), Provenance::new("a", 1)),
        ];
        let outcome = engine.deduplicate(input).unwrap();
        assert_eq!(outcome.records.len(), 2);
        assert!(outcome.collisions.is_empty());
    }

    #[test]
    fn test_higher_rank_wins_regardless_of_arrival() {
        let engine = DeduplicationEngine::new();
        let input = vec![
            (create_test_record("Azteca", Category::Gen55_59, 1, 200.0), Provenance::new("fresh", 18)),
            (create_test_record("Azteca", Category::Gen55_59, 1, 100.0), Provenance::new("legacy", 0)),
        ];
        let outcome = engine.deduplicate(input).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].value_local, 200.0);
        assert_eq!(outcome.collisions.len(), 1);
        assert_eq!(outcome.collisions[0].kept.source_name, "fresh");
        assert_eq!(outcome.collisions[0].discarded.source_name, "legacy");
        assert!(outcome.collisions[0].values_differ());
    }

    #[test]
    fn test_same_rank_later_arrival_wins() {
        let engine = DeduplicationEngine::new();
        let input = vec![
            (create_test_record("Azteca", Category::Gen55_59, 1, 1.0), Provenance::new("r", 5).at(10, 4)),
            (create_test_record("Azteca", Category::Gen55_59, 1, 2.0), Provenance::new("r", 5).at(20, 4)),
        ];
        let outcome = engine.deduplicate(input).unwrap();
        assert_eq!(outcome.records[0].value_local, 2.0);
    }

    #[test]
    fn test_reject_policy() {
        let engine = DeduplicationEngine::with_policy(ResolutionPolicy::RejectDuplicates);
        let input = vec![
            (create_test_record("Azteca", Category::Gen55_59, 1, 1.0), Provenance::new("a", 1)),
            (create_test_record("Azteca", Category::Gen55_59, 1, 1.0), Provenance::new("b", 2)),
        ];
        assert!(matches!(
            engine.deduplicate(input),
            Err(PipelineError::Validation { .. })
        ));
    }

    #[test]
    fn test_output_is_in_canonical_order() {
        let engine = DeduplicationEngine::new();
        let input = vec![
            (create_test_record("Zeta", Category::Gen95_99, 1, 1.0), Provenance::new("a", 1)),
            (create_test_record("Azteca", Category::Gen95_99, 2, 1.0), Provenance::new("a", 1)),
            (create_test_record("Zeta", Category::Pensiones, 1, 1.0), Provenance::new("a", 1)),
        ];
        let outcome = engine.deduplicate(input).unwrap();
        let order: Vec<(Category, &str)> = outcome
            .records
            .iter()
            .map(|r| (r.category, r.entity.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (Category::Pensiones, "Zeta"),
                (Category::Gen95_99, "Azteca"),
                (Category::Gen95_99, "Zeta"),
            ]
        );
    }
}
