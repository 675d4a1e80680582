//! Shared query result cache
//!
//! Results are stored together with the generation of every invalidation key
//! they depend on. Invalidating a key bumps its generation, so any entry that
//! captured an older generation is treated as a miss and replaced on the next
//! lookup. The cache is shared between worker contexts; each context only
//! invalidates after its transaction has committed.

use dashmap::DashMap;
use sluice_core::{Row, Value};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
struct CacheKey {
    sql: String,
    params: Vec<Value>,
}

impl CacheKey {
    fn fingerprint(&self) -> String {
        format!("{}|{:?}", self.sql, self.params)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    key: CacheKey,
    dependencies: Vec<(String, u64)>,
    rows: Arc<Vec<Row>>,
}

/// Generation-checked cache of query results
#[derive(Debug)]
pub struct QueryCache {
    generations: DashMap<String, u64>,
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
}

impl QueryCache {
    /// Cache holding at most `max_entries` results
    pub fn new(max_entries: usize) -> Self {
        QueryCache {
            generations: DashMap::new(),
            entries: DashMap::new(),
            max_entries,
        }
    }

    /// Current generation of an invalidation key
    pub fn generation(&self, key: &str) -> u64 {
        self.generations.get(key).map(|g| *g).unwrap_or(0)
    }

    /// Snapshot generations for a set of keys
    pub fn generations(&self, keys: &[&str]) -> Vec<(String, u64)> {
        keys.iter()
            .map(|k| (k.to_string(), self.generation(k)))
            .collect()
    }

    /// Cached rows for a query, if still valid
    pub fn get(&self, sql: &str, params: &[Value]) -> Option<Arc<Vec<Row>>> {
        let key = CacheKey {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        let entry = self.entries.get(&key.fingerprint())?;
        if entry.key != key {
            return None;
        }
        let fresh = entry
            .dependencies
            .iter()
            .all(|(k, generation)| self.generation(k) == *generation);
        if fresh {
            trace!(sql, "query cache hit");
            Some(Arc::clone(&entry.rows))
        } else {
            None
        }
    }

    /// Store rows read while the given generations were current
    pub fn put(
        &self,
        sql: &str,
        params: &[Value],
        dependencies: Vec<(String, u64)>,
        rows: Arc<Vec<Row>>,
    ) {
        if self.max_entries == 0 {
            return;
        }
        let key = CacheKey {
            sql: sql.to_string(),
            params: params.to_vec(),
        };
        let fingerprint = key.fingerprint();
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&fingerprint) {
            self.evict_stale();
            if self.entries.len() >= self.max_entries {
                self.entries.clear();
            }
        }
        self.entries.insert(
            fingerprint,
            CacheEntry {
                key,
                dependencies,
                rows,
            },
        );
    }

    /// Invalidate every entry that depends on `key`
    pub fn invalidate(&self, key: &str) {
        *self.generations.entry(key.to_string()).or_insert(0) += 1;
        trace!(key, "query cache key invalidated");
    }

    /// Number of stored entries, valid or not
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_stale(&self) {
        self.entries.retain(|_, entry| {
            entry
                .dependencies
                .iter()
                .all(|(k, generation)| self.generation(k) == *generation)
        });
    }
}
