//! Storage layer for sluice
//!
//! This crate owns the physical connection to the relational store:
//! - Backend: closed set of supported stores with one capability surface
//! - SqliteBackend: statement execution, catalog introspection and DDL for SQLite
//!
//! Nothing here decides whether a failure is retryable. Errors leave this crate
//! as raw `Error::Connection` values tagged with the backend's diagnostic code.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod sqlite;

pub use backend::Backend;
pub use sqlite::SqliteBackend;
