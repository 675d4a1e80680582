//! Prerequisite Gate Integration Tests
//!
//! Eligibility, removal overloads, install/uninstall and cache visibility
//! across worker contexts.

#[path = "../common/mod.rs"]
mod common;

mod install;
mod owner_schema;
mod removal;
