use crate::enrichment::EnrichedRecord;
use crate::entities::{Category, Concept};
use crate::fx::FxSeriesStore;
use crate::period::PeriodKey;
use crate::record::{int_or_string, CanonicalRecord, Provenance, RawRecord};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Transaction};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

// ============================================================================
// JSON RECORD FILES
// ============================================================================

/// Write a record set as pretty JSON, in the order given
pub fn write_records_json<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(records)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), records = records.len(), "record set written");
    Ok(())
}

fn read_records_json<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn read_canonical_json(path: &Path) -> Result<Vec<CanonicalRecord>> {
    read_records_json(path)
}

pub fn read_enriched_json(path: &Path) -> Result<Vec<EnrichedRecord>> {
    read_records_json(path)
}

/// Record as found in older exports: labels are free text
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    #[serde(rename = "Afore")]
    entity: String,
    #[serde(rename = "Siefore")]
    category: String,
    #[serde(rename = "Concept")]
    concept: String,
    #[serde(rename = "PeriodYear", deserialize_with = "int_or_string")]
    period_year: i32,
    #[serde(rename = "PeriodMonth", deserialize_with = "int_or_string")]
    period_month: u32,
    #[serde(rename = "valueMXN")]
    value_local: f64,
}

/// Load a previously exported record set as raw records (labels unresolved).
/// Values are already in base units.
pub fn load_legacy_records(path: &Path, rank: usize) -> Result<Vec<RawRecord>> {
    let legacy: Vec<LegacyRecord> = read_records_json(path)?;
    let source_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());

    let records: Vec<RawRecord> = legacy
        .into_iter()
        .map(|r| RawRecord {
            entity: r.entity,
            category_label: r.category,
            concept_label: r.concept,
            period_year: r.period_year,
            period_month: r.period_month,
            value_local: r.value_local,
            provenance: Provenance::new(&source_name, rank),
        })
        .collect();

    info!(source = %source_name, records = records.len(), "legacy records loaded");
    Ok(records)
}

/// SHA-256 over the canonical set. Independent of input order.
pub fn fingerprint(records: &[CanonicalRecord]) -> String {
    let mut sorted: Vec<&CanonicalRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.key());

    let mut hasher = Sha256::new();
    for r in sorted {
        hasher.update(format!(
            "{}|{}|{}|{}|{:?}\n",
            r.category,
            r.entity,
            r.concept,
            r.period(),
            r.value_local
        ));
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// AUDIT EVENTS
// ============================================================================

/// Audit trail entry; `entity_id` is the run id for run-level events
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(event_type: &str, entity_type: &str, entity_id: &str, data: serde_json::Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn new_run_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // Canonical set: the unique key is enforced by the schema
    conn.execute(
        "CREATE TABLE IF NOT EXISTS canonical_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            siefore TEXT NOT NULL,
            afore TEXT NOT NULL,
            concept TEXT NOT NULL,
            period_year INTEGER NOT NULL,
            period_month INTEGER NOT NULL,
            value_mxn REAL NOT NULL,
            run_id TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (siefore, afore, concept, period_year, period_month)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enriched_records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            siefore TEXT NOT NULL,
            afore TEXT NOT NULL,
            concept TEXT NOT NULL,
            period_year INTEGER NOT NULL,
            period_month INTEGER NOT NULL,
            value_mxn REAL NOT NULL,
            fx_eom REAL,
            value_usd REAL,
            reason TEXT,
            run_id TEXT NOT NULL,
            UNIQUE (siefore, afore, concept, period_year, period_month)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fx_rates (
            series_id TEXT NOT NULL,
            period TEXT NOT NULL,
            rate REAL NOT NULL,
            fetched_at TEXT NOT NULL,
            PRIMARY KEY (series_id, period)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_canonical_period ON canonical_records(period_year, period_month)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path).with_context(|| format!("Failed to open database {}", path.display()))?;
    setup_database(&conn)?;
    Ok(conn)
}

// ============================================================================
// CANONICAL RECORDS
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertStats {
    pub inserted: usize,
    pub duplicates: usize,
}

/// Insert canonical records; rows whose key already exists are counted, not
/// written.
pub fn insert_canonical_records(conn: &Connection, run_id: &str, records: &[CanonicalRecord]) -> Result<InsertStats> {
    let tx = conn.unchecked_transaction()?;
    let stats = insert_canonical_in(&tx, run_id, records)?;
    tx.commit()?;
    debug!(inserted = stats.inserted, duplicates = stats.duplicates, "canonical records stored");
    Ok(stats)
}

/// Replace the stored canonical set with this run's set. The old rows stay
/// in place if any insert fails.
pub fn replace_canonical_records(conn: &Connection, run_id: &str, records: &[CanonicalRecord]) -> Result<InsertStats> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM canonical_records", [])?;
    let stats = insert_canonical_in(&tx, run_id, records)?;
    tx.commit()?;
    debug!(inserted = stats.inserted, "canonical set replaced");
    Ok(stats)
}

fn insert_canonical_in(tx: &Transaction, run_id: &str, records: &[CanonicalRecord]) -> Result<InsertStats> {
    let mut stats = InsertStats::default();

    {
        let mut stmt = tx.prepare(
            "INSERT INTO canonical_records (
                siefore, afore, concept, period_year, period_month, value_mxn, run_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;

        for r in records {
            let result = stmt.execute(params![
                r.category.as_str(),
                r.entity,
                r.concept.as_str(),
                r.period_year,
                r.period_month,
                r.value_local,
                run_id,
            ]);

            match result {
                Ok(_) => stats.inserted += 1,
                Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                    stats.duplicates += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    Ok(stats)
}

fn category_from_db(label: &str) -> Result<Category> {
    Category::from_canonical(label).ok_or_else(|| anyhow!("Unknown category in database: {}", label))
}

fn concept_from_db(label: &str) -> Result<Concept> {
    Concept::from_label(label).ok_or_else(|| anyhow!("Unknown concept in database: {}", label))
}

/// All canonical records, in canonical order
pub fn get_all_canonical(conn: &Connection) -> Result<Vec<CanonicalRecord>> {
    let mut stmt = conn.prepare(
        "SELECT siefore, afore, concept, period_year, period_month, value_mxn FROM canonical_records",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i32>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, f64>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut records = rows
        .into_iter()
        .map(|(siefore, afore, concept, year, month, value)| -> Result<CanonicalRecord> {
            Ok(CanonicalRecord {
                entity: afore,
                category: category_from_db(&siefore)?,
                concept: concept_from_db(&concept)?,
                period_year: year,
                period_month: month,
                value_local: value,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    records.sort_by_key(|r| r.key());
    Ok(records)
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM canonical_records", [], |row| row.get(0))?;
    Ok(count)
}

// ============================================================================
// ENRICHED RECORDS
// ============================================================================

pub fn replace_enriched_records(conn: &Connection, run_id: &str, records: &[EnrichedRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM enriched_records", [])?;

    {
        let mut stmt = tx.prepare(
            "INSERT INTO enriched_records (
                siefore, afore, concept, period_year, period_month, value_mxn,
                fx_eom, value_usd, reason, run_id
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;

        for r in records {
            stmt.execute(params![
                r.category.as_str(),
                r.entity,
                r.concept.as_str(),
                r.period_year,
                r.period_month,
                r.value_local,
                r.fx_rate,
                r.value_foreign,
                r.reason.map(|code| code.as_str()),
                run_id,
            ])?;
        }
    }

    tx.commit()?;
    Ok(records.len())
}

/// (enriched, missing) counts as stored
pub fn enriched_counts(conn: &Connection) -> Result<(i64, i64)> {
    let counts = conn.query_row(
        "SELECT
            COALESCE(SUM(CASE WHEN value_usd IS NOT NULL THEN 1 ELSE 0 END), 0),
            COALESCE(SUM(CASE WHEN value_usd IS NULL THEN 1 ELSE 0 END), 0)
         FROM enriched_records",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    Ok(counts)
}

// ============================================================================
// FX RATES
// ============================================================================

pub fn save_fx_rates(conn: &Connection, store: &FxSeriesStore) -> Result<usize> {
    let fetched_at = store
        .fetched_at()
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM fx_rates WHERE series_id = ?1", params![store.series_id()])?;
    {
        let mut stmt = tx.prepare("INSERT INTO fx_rates (series_id, period, rate, fetched_at) VALUES (?1, ?2, ?3, ?4)")?;
        for (period, rate) in store.rates() {
            stmt.execute(params![store.series_id(), period.to_string(), rate, fetched_at])?;
        }
    }
    tx.commit()?;
    Ok(store.len())
}

pub fn load_fx_rates(conn: &Connection, series_id: &str) -> Result<BTreeMap<PeriodKey, f64>> {
    let mut stmt = conn.prepare("SELECT period, rate FROM fx_rates WHERE series_id = ?1")?;
    let rows = stmt
        .query_map(params![series_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(period, rate)| -> Result<(PeriodKey, f64)> {
            let key: PeriodKey = period
                .parse()
                .map_err(|_| anyhow!("Invalid period in fx_rates: {}", period))?;
            Ok((key, rate))
        })
        .collect()
}

// ============================================================================
// EVENTS
// ============================================================================

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// Events for one entity, oldest first
pub fn get_events_for_entity(conn: &Connection, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY id ASC",
    )?;

    let rows = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(event_id, timestamp, event_type, entity_type, entity_id, data, actor)| -> Result<Event> {
            Ok(Event {
                event_id,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .with_context(|| format!("Invalid event timestamp {}", timestamp))?
                    .with_timezone(&Utc),
                event_type,
                entity_type,
                entity_id,
                data: serde_json::from_str(&data)?,
                actor,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrichment::ReasonCode;

    fn create_test_record(entity: &str, category: Category, month: u32, value: f64) -> CanonicalRecord {
        CanonicalRecord {
            entity: entity.to_string(),
            category,
            concept: Concept::TrustSecurities,
            period_year: 2024,
            period_month: month,
            value_local: value,
        }
    }

    fn test_records() -> Vec<CanonicalRecord> {
        vec![
            create_test_record("Profuturo", Category::Gen80_84, 3, 1_500.0),
            create_test_record("Azteca", Category::Pensiones, 1, 2_000.0),
            create_test_record("Coppel", Category::Gen80_84, 2, 0.0),
        ]
    }

    #[test]
    fn test_import_twice_inserts_nothing_new() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let records = test_records();

        let first = insert_canonical_records(&conn, "run-1", &records).unwrap();
        let second = insert_canonical_records(&conn, "run-2", &records).unwrap();

        assert_eq!(first, InsertStats { inserted: 3, duplicates: 0 });
        assert_eq!(second, InsertStats { inserted: 0, duplicates: 3 });
        assert_eq!(verify_count(&conn).unwrap(), 3);
    }

    #[test]
    fn test_canonical_round_trip_in_canonical_order() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        let records = test_records();
        replace_canonical_records(&conn, "run-1", &records).unwrap();

        let loaded = get_all_canonical(&conn).unwrap();
        let mut expected = records.clone();
        expected.sort_by_key(|r| r.key());
        assert_eq!(loaded, expected);
    }

    #[test]
    fn test_failed_replace_keeps_previous_set() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        replace_canonical_records(&conn, "run-1", &test_records()).unwrap();

        // DELETE still works, every INSERT now fails
        conn.execute("ALTER TABLE canonical_records RENAME COLUMN run_id TO loaded_by", [])
            .unwrap();
        assert!(replace_canonical_records(&conn, "run-2", &test_records()).is_err());

        assert_eq!(verify_count(&conn).unwrap(), 3);
    }

    #[test]
    fn test_fingerprint_ignores_order_but_not_values() {
        let records = test_records();
        let mut reversed = records.clone();
        reversed.reverse();
        assert_eq!(fingerprint(&records), fingerprint(&reversed));
        assert_eq!(fingerprint(&records).len(), 64);

        let mut changed = records.clone();
        changed[0].value_local += 1.0;
        assert_ne!(fingerprint(&records), fingerprint(&changed));
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("canonical.json");
        let records = test_records();
        write_records_json(&path, &records).unwrap();
        assert_eq!(read_canonical_json(&path).unwrap(), records);
    }

    #[test]
    fn test_legacy_records_accept_string_periods() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("merged.json");
        fs::write(
            &path,
            r#"[{"Afore": "Azteca", "Siefore": "Básica 55-59", "Concept": "Total de Activo",
                 "PeriodYear": "2024", "PeriodMonth": "07", "valueMXN": 1500.0}]"#,
        )
        .unwrap();

        let raw = load_legacy_records(&path, 0).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].period_year, 2024);
        assert_eq!(raw[0].period_month, 7);
        assert_eq!(raw[0].category_label, "Básica 55-59");
        assert_eq!(raw[0].provenance.source_name, "merged.json");
    }

    #[test]
    fn test_enriched_and_fx_tables() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let base = create_test_record("Azteca", Category::Inicial, 1, 10.0);
        let enriched = vec![
            EnrichedRecord {
                entity: base.entity.clone(),
                category: base.category,
                concept: base.concept,
                period_year: 2024,
                period_month: 1,
                value_local: 10.0,
                fx_rate: Some(17.0),
                value_foreign: Some(10.0 / 17.0),
                reason: None,
            },
            EnrichedRecord {
                period_month: 2,
                fx_rate: None,
                value_foreign: None,
                reason: Some(ReasonCode::NoRateForPeriod),
                entity: base.entity.clone(),
                category: base.category,
                concept: base.concept,
                period_year: 2024,
                value_local: 10.0,
            },
        ];
        replace_enriched_records(&conn, "run-1", &enriched).unwrap();
        assert_eq!(enriched_counts(&conn).unwrap(), (1, 1));

        let rates = BTreeMap::from([(PeriodKey::new(2024, 1).unwrap(), 17.0)]);
        let store = FxSeriesStore::from_rates("SF43718", rates.clone(), Utc::now());
        save_fx_rates(&conn, &store).unwrap();
        assert_eq!(load_fx_rates(&conn, "SF43718").unwrap(), rates);
    }

    #[test]
    fn test_event_log() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let run_id = new_run_id();
        let event = Event::new(
            "run_started",
            "run",
            &run_id,
            serde_json::json!({"reports": 11}),
            "pipeline",
        );
        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "run", &run_id).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "run_started");
        assert_eq!(events[0].data["reports"], 11);
    }
}
