//! Configuration Tests
//!
//! Contexts opened from a `sluice.toml` next to the database.

use crate::common::*;
use sluice::{JournalMode, CONFIG_FILE_NAME};

#[test]
fn open_from_written_default_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_path = dir.path().join(CONFIG_FILE_NAME);
    StoreConfig::write_default_if_missing(&config_path).unwrap();

    let mut config = StoreConfig::from_file(&config_path).unwrap();
    config.path = dir.path().join("jobs.db");
    config.journal_mode = JournalMode::Delete;
    config.write_to_file(&config_path).unwrap();

    let loaded = StoreConfig::from_file(&config_path).unwrap();
    let mut db = TransactionManager::open_standalone(&loaded).unwrap();
    let rows = db.perform_query("PRAGMA journal_mode", &[], &[]).unwrap();
    assert_eq!(rows[0].get_str("journal_mode").unwrap(), "delete");
    assert_eq!(db.max_in_clause(), 100);
}

#[test]
fn invalid_config_refuses_to_open() {
    let mut config = StoreConfig::in_memory();
    config.max_in_clause = 0;
    let err = TransactionManager::open_standalone(&config).err().unwrap();
    assert_eq!(err.kind(), sluice::ErrorKind::SchemaMismatch);
}
