//! Store configuration via `sluice.toml`
//!
//! A worker process reads one `StoreConfig` at startup and opens one
//! transaction manager per worker context from it. On first start a commented
//! default file can be written next to the database.

use crate::error::{Error, Result};
use crate::types::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file name placed next to the database file.
pub const CONFIG_FILE_NAME: &str = "sluice.toml";

/// Default number of inserted rows between statistics refreshes.
pub const DEFAULT_ANALYZE_THRESHOLD: u64 = 50_000;

/// Default number of delete calls between index rebuilds.
pub const DEFAULT_REINDEX_THRESHOLD: u64 = 250_000;

/// Default upper bound on members of one IN (...) list.
pub const DEFAULT_MAX_IN_CLAUSE: usize = 100;

/// Thresholds for deferred table maintenance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MaintenanceConfig {
    /// Mutations between statistics refreshes
    #[serde(default = "default_analyze_threshold")]
    pub analyze_threshold: u64,
    /// Mutations between index rebuilds
    #[serde(default = "default_reindex_threshold")]
    pub reindex_threshold: u64,
}

fn default_analyze_threshold() -> u64 {
    DEFAULT_ANALYZE_THRESHOLD
}

fn default_reindex_threshold() -> u64 {
    DEFAULT_REINDEX_THRESHOLD
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            analyze_threshold: DEFAULT_ANALYZE_THRESHOLD,
            reindex_threshold: DEFAULT_REINDEX_THRESHOLD,
        }
    }
}

/// Shared query cache sizing
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum cached query results
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

fn default_cache_entries() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

/// SQLite journal mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// Write-ahead log; readers do not block the writer
    Wal,
    /// Classic rollback journal
    Delete,
}

impl JournalMode {
    /// Value for the `journal_mode` pragma
    pub fn pragma_value(&self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
        }
    }
}

/// Store configuration loaded from `sluice.toml`.
///
/// # Example
///
/// ```toml
/// backend = "sqlite"
/// path = "crawler.db"
/// journal_mode = "wal"
/// busy_timeout_ms = 0
///
/// [maintenance]
/// analyze_threshold = 50000
/// reindex_threshold = 250000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// Backend variant
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// Database file; `":memory:"` opens a private in-memory database
    #[serde(default = "default_path")]
    pub path: PathBuf,
    /// Journal mode
    #[serde(default = "default_journal_mode")]
    pub journal_mode: JournalMode,
    /// How long a statement waits on a lock before failing
    #[serde(default)]
    pub busy_timeout_ms: u64,
    /// Enforce foreign-key references
    #[serde(default = "default_true")]
    pub foreign_keys: bool,
    /// Upper bound on members of one IN (...) list
    #[serde(default = "default_max_in_clause")]
    pub max_in_clause: usize,
    /// Maintenance thresholds
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    /// Query cache sizing
    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_backend() -> BackendKind {
    BackendKind::Sqlite
}

fn default_path() -> PathBuf {
    PathBuf::from("sluice.db")
}

fn default_journal_mode() -> JournalMode {
    JournalMode::Wal
}

fn default_true() -> bool {
    true
}

fn default_max_in_clause() -> usize {
    DEFAULT_MAX_IN_CLAUSE
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_path(),
            journal_mode: default_journal_mode(),
            busy_timeout_ms: 0,
            foreign_keys: true,
            max_in_clause: DEFAULT_MAX_IN_CLAUSE,
            maintenance: MaintenanceConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Default config pointing at the given database file
    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Config for a private in-memory database
    pub fn in_memory() -> Self {
        Self::for_path(":memory:")
    }

    /// Check values that serde cannot.
    ///
    /// # Errors
    ///
    /// Returns a schema mismatch for zero thresholds or a zero IN-list bound.
    pub fn validate(&self) -> Result<()> {
        if self.maintenance.analyze_threshold == 0 || self.maintenance.reindex_threshold == 0 {
            return Err(Error::schema("maintenance thresholds must be greater than zero"));
        }
        if self.max_in_clause == 0 {
            return Err(Error::schema("max_in_clause must be greater than zero"));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Sluice store configuration
#
# Backend: only "sqlite" is supported
backend = "sqlite"

# Database file (":memory:" for a private in-memory database)
path = "sluice.db"

# Journal mode: "wal" (default) or "delete"
journal_mode = "wal"

# Milliseconds a statement waits on a lock. 0 surfaces lock waits
# immediately as retryable transaction aborts.
busy_timeout_ms = 0

# Enforce foreign-key references (default: true)
foreign_keys = true

# Upper bound on members of one IN (...) list
max_in_clause = 100

[maintenance]
# Inserted rows between statistics refreshes
analyze_threshold = 50000
# Delete calls between index rebuilds
reindex_threshold = 250000

[cache]
max_entries = 1024
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::schema(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: StoreConfig = toml::from_str(&content).map_err(|e| {
            Error::schema(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::schema(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::schema(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::schema(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
