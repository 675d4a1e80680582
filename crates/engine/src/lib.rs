//! Engine layer for sluice
//!
//! This crate builds the table-level components on top of the transaction
//! manager:
//! - SchemaManager: idempotent column and index reconciliation for one table
//! - PrerequisiteGate: named-condition rows that keep owning records ineligible
//!
//! Both issue every statement through a `TransactionManager`, so their errors
//! have already passed the conflict classifier.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod prereq;
pub mod schema;

pub use prereq::{
    OwnerSet, PrerequisiteGate, EVENT_NAME_COLUMN, GATE_TABLE, MAX_EVENT_NAME_LEN, OWNER_COLUMN,
};
pub use schema::SchemaManager;
