//! Transaction Integration Tests
//!
//! Worker contexts sharing one on-disk SQLite database: nesting, conflict
//! classification under real lock contention, deferred maintenance and
//! configuration loading.

#[path = "../common/mod.rs"]
mod common;

mod config_loading;
mod deferred_maintenance;
mod nesting;
