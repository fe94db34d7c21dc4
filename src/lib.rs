// Daybook Sync - Core Library
// Reconciles a stored day of bank transactions with its target sequence

pub mod record;         // Stored/target records, identities, fingerprints
pub mod schema;         // Input validation
pub mod diff;           // LCS matcher
pub mod guard;          // Protection predicate
pub mod reconciliation; // Position reconciler
pub mod emit;           // Emitter contract, in-memory replay, SQL script
pub mod db;             // SQLite store + transactional emitter
pub mod settings;       // Table/column labels, insert defaults
pub mod parser;         // CSV/JSON input

// Re-export commonly used types
pub use record::{
    Attributes, Fingerprint, FingerprintFn, RawRecord, RawTarget, Record, RecordId, TargetRecord,
};
pub use schema::{
    Field, SchemaValidator, Sequence, ValidatedDay, ValidationError, ValidationResult, Violation,
};
pub use diff::{align, Aligner, Hunk, LcsAligner};
pub use guard::{Guard, NoProtection};
pub use reconciliation::{
    Operation, Phase, Plan, ReconcileError, ReconciliationEngine,
};
pub use emit::{check_insert_dates, ApplyOutcome, Emitter, MemoryEmitter, SqlScript};
pub use db::{
    Event, SqliteEmitter,
    setup_database, load_day, protected_ids, count_day,
    insert_event, get_events_for_entity,
};
pub use settings::{Columns, Settings};
pub use parser::{
    load_records_json, load_targets, protected_in_dump, read_targets_csv, InputFormat,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
