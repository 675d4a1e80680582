//! Sluice - transactional coordination for shared job-queue tables
//!
//! Sluice wraps a relational store with:
//! - begin/end/rollback-signal primitives with isolation and nesting rules
//! - a conflict classifier that turns backend lock, serialization and
//!   duplicate-insert failures into one retryable `TransactionAbort`
//! - deferred ANALYZE/REINDEX maintenance that only runs after a commit
//! - a prerequisite-event gate whose eligibility predicate embeds in
//!   scheduler queries
//!
//! # Quick Start
//!
//! ```ignore
//! use sluice::{IsolationLevel, PrerequisiteGate, StoreConfig, TransactionManager};
//!
//! let config = StoreConfig::from_file(Path::new("sluice.toml"))?;
//! let mut db = TransactionManager::open_standalone(&config)?;
//! let gate = PrerequisiteGate::new(config.maintenance)?;
//! gate.install(&mut db, "jobqueue", "id")?;
//!
//! loop {
//!     let result = db.transaction(IsolationLevel::Serialized, |db| {
//!         gate.add_events(db, 5, &["lock"])
//!     });
//!     match result {
//!         Err(e) if e.is_retryable() => continue,
//!         other => break other?,
//!     }
//! }
//! ```
//!
//! The library never retries on its own; the loop above is the caller's policy.

pub use sluice_concurrency::{
    ConflictClassifier, MaintenanceCounter, MaintenanceTracker, QueryCache, TransactionManager,
    TransactionMetrics, TransactionScope,
};
pub use sluice_core::*;
pub use sluice_engine::{OwnerSet, PrerequisiteGate, SchemaManager, GATE_TABLE};
pub use sluice_storage::{Backend, SqliteBackend};
