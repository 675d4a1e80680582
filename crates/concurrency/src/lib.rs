//! Concurrency layer for sluice
//!
//! This crate implements the transaction coordination layer:
//! - ConflictClassifier: the only place backend codes become retryable aborts
//! - TransactionScope / TransactionManager: begin/end/rollback-signal with nesting rules
//! - MaintenanceCounter / MaintenanceTracker: self-throttling ANALYZE/REINDEX scheduling
//! - QueryCache: shared results invalidated at commit boundaries
//!
//! The layer never retries. On `Error::TransactionAbort` the caller re-runs
//! its whole unit of work from the start.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod conflict;
pub mod maintenance;
pub mod manager;
pub mod scope;

pub use cache::QueryCache;
pub use conflict::ConflictClassifier;
pub use maintenance::{MaintenanceCounter, MaintenanceTracker};
pub use manager::{TransactionManager, TransactionMetrics};
pub use scope::TransactionScope;
