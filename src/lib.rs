// Afore Pipeline - Core Library
// Siefore holdings reports → canonical record set → FX-enriched record set

pub mod text;
pub mod period;
pub mod entities;
pub mod record;
pub mod sheet;
pub mod error;
pub mod parser;         // Spreadsheet Extractor
pub mod deduplication;  // Unique-key collision resolution
pub mod data_quality;   // Per-record validation rules
pub mod normalizer;     // Record Normalizer
pub mod fx;             // FX Series Store
pub mod fx_fetch;       // Banxico SIE client
pub mod enrichment;     // Enrichment Joiner
pub mod db;
pub mod report;
pub mod config;
pub mod pipeline;

// Re-export commonly used types
pub use config::{FxConfig, PathsConfig, PipelineConfig, ValidationConfig};
pub use data_quality::{BatchSummary, DataQualityEngine, QualityIssue, Severity, ValidationResult};
pub use db::{
    fingerprint, get_all_canonical, load_legacy_records, read_canonical_json, read_enriched_json,
    setup_database, verify_count, write_records_json, Event,
};
pub use deduplication::{Collision, DeduplicationEngine, ResolutionPolicy};
pub use enrichment::{enrich, EnrichedRecord, EnrichmentSummary, ReasonCode};
pub use entities::{Category, CategoryRegistry, Concept, ReportId};
pub use error::{ExtractionReason, PipelineError};
pub use fx::FxSeriesStore;
pub use fx_fetch::{parse_banxico_response, BanxicoClient, FxSource};
pub use normalizer::{NormalizationReport, RecordNormalizer, RecordSetStats};
pub use parser::{detect_report, get_parser, ReportParser, SheetLayout, SieforeReportParser};
pub use period::PeriodKey;
pub use pipeline::{Pipeline, RunOptions, RunSummary};
pub use record::{CanonicalRecord, Provenance, RawRecord, RecordKey};
pub use sheet::{Cell, CellGrid};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
