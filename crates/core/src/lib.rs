//! Core types for sluice
//!
//! This crate defines the vocabulary every other layer speaks:
//! - Error / ErrorKind: the four-kind error taxonomy and the structured store failure
//! - IsolationLevel: ReadCommitted, Serialized, Enclosing
//! - Value / Row / SqlFragment: backend-neutral statement parameters and results
//! - ColumnDescription / IndexDescription: dialect-free schema descriptors
//! - StoreConfig: `sluice.toml` configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{CacheConfig, JournalMode, MaintenanceConfig, StoreConfig, CONFIG_FILE_NAME};
pub use error::{
    ConflictClass, DiagnosticCode, Error, ErrorKind, Result, StatementKind, StoreFailure,
};
pub use types::{
    check_identifier, BackendKind, ColumnDescription, ColumnReference, IndexDescription,
    IndexInfo, IsolationLevel, Row, SqlFragment, TableColumns, Value,
};
