//! Shared test utilities for all integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from any test's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::PathBuf;
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

pub use sluice::{
    ColumnDescription, Error, IsolationLevel, MaintenanceConfig, PrerequisiteGate, QueryCache,
    Result, SchemaManager, StoreConfig, TableColumns, TransactionManager, Value,
};
use tempfile::TempDir;

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness (shown with --nocapture).
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

// ============================================================================
// TestStore - on-disk database shared by several worker contexts
// ============================================================================

/// An on-disk SQLite database in a temp dir plus the cache its contexts share.
pub struct TestStore {
    pub dir: TempDir,
    pub config: StoreConfig,
    pub cache: Arc<QueryCache>,
}

impl TestStore {
    /// Fresh database with default settings.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Fresh database, config adjusted by `adjust`.
    pub fn with_config(adjust: impl FnOnce(&mut StoreConfig)) -> Self {
        init_tracing();
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = StoreConfig::for_path(dir.path().join("jobs.db"));
        adjust(&mut config);
        let cache = Arc::new(QueryCache::new(config.cache.max_entries));
        TestStore { dir, config, cache }
    }

    /// Database file path.
    pub fn path(&self) -> PathBuf {
        self.config.path.clone()
    }

    /// Open one more worker context on the shared database.
    pub fn context(&self) -> TransactionManager {
        TransactionManager::open(&self.config, Arc::clone(&self.cache))
            .expect("Failed to open worker context")
    }

    /// A gate with this store's maintenance thresholds.
    pub fn gate(&self) -> PrerequisiteGate {
        PrerequisiteGate::new(self.config.maintenance).expect("Failed to build gate")
    }

    /// Create `jobqueue(id, status)` with the given ids in status `P`, and install the gate.
    pub fn with_jobs(&self, ids: impl IntoIterator<Item = i64>) -> PrerequisiteGate {
        let mut db = self.context();
        create_jobqueue(&mut db);
        for id in ids {
            db.perform_insert(
                "jobqueue",
                &[("id", Value::Int(id)), ("status", Value::from("P"))],
                &["jobqueue"],
            )
            .expect("Failed to insert job");
        }
        let gate = self.gate();
        gate.install(&mut db, "jobqueue", "id")
            .expect("Failed to install gate");
        gate
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the owning table used by gate tests.
pub fn create_jobqueue(db: &mut TransactionManager) {
    SchemaManager::new("jobqueue")
        .unwrap()
        .create_table(
            db,
            &TableColumns::new()
                .with("id", ColumnDescription::new("BIGINT").primary_key())
                .with("status", ColumnDescription::new("CHAR(1)").nullable()),
        )
        .expect("Failed to create jobqueue");
}

/// Count rows of a table, bypassing the cache.
pub fn row_count(db: &mut TransactionManager, table: &str) -> i64 {
    db.perform_query(&format!("SELECT COUNT(*) AS n FROM {}", table), &[], &[])
        .expect("count query failed")[0]
        .get_i64("n")
        .expect("count column")
}

// ============================================================================
// Retry policy
// ============================================================================

/// Outcome of a retried unit of work.
pub struct Retried<T> {
    pub value: T,
    pub attempts: usize,
}

/// Re-run `body` in a fresh transaction until it does not abort.
///
/// This is the caller-side policy the library leaves to its users.
pub fn run_with_retry<T>(
    db: &mut TransactionManager,
    isolation: IsolationLevel,
    max_attempts: usize,
    mut body: impl FnMut(&mut TransactionManager) -> Result<T>,
) -> Result<Retried<T>> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        match db.transaction(isolation, &mut body) {
            Ok(value) => return Ok(Retried { value, attempts }),
            Err(e) if e.is_retryable() && attempts < max_attempts => {
                thread::sleep(Duration::from_millis(1 + (attempts as u64 % 5)));
            }
            Err(e) => return Err(e),
        }
    }
}
