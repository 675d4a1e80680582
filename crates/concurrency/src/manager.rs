//! Transaction manager for one worker context
//!
//! Owns the context's backend connection and its (at most one) open
//! [`TransactionScope`]. Provides:
//! 1. begin/end/signal_rollback with isolation and nesting rules
//! 2. Statement helpers whose failures pass through the conflict classifier
//! 3. Deferred maintenance: ANALYZE/REINDEX requested inside a transaction
//!    run only after the outermost successful commit
//! 4. Cache invalidation applied at the same commit boundary as the write
//!
//! ## Nesting
//!
//! ```text
//! begin(Serialized)      physical BEGIN + serializable pragma, depth 0
//!   begin(any)           depth 1, no physical effect (suppressed)
//!   signal_rollback()    ignored: the outer level owns the decision
//!   end()                depth 0, no physical effect
//! end()                  physical COMMIT, then pending maintenance
//! ```
//!
//! Suppressing every nested begin inside a Serialized scope, read-only ones
//! included, works around SQLite having no nested transactions under its
//! serializable locking. It is a backend workaround, not a general rule.

use crate::cache::QueryCache;
use crate::conflict::ConflictClassifier;
use crate::scope::TransactionScope;
use sluice_core::{
    check_identifier, BackendKind, ColumnDescription, Error, IndexDescription, IndexInfo,
    IsolationLevel, Result, Row, SqlFragment, StatementKind, StoreConfig, TableColumns, Value,
};
use sluice_storage::Backend;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Counters describing what this manager has done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionMetrics {
    /// Physical transactions started
    pub total_started: u64,
    /// Physical commits that succeeded
    pub total_committed: u64,
    /// Physical transactions rolled back (signaled or after a failed commit)
    pub total_rolled_back: u64,
    /// Nested begins absorbed by a Serialized scope
    pub suppressed_begins: u64,
    /// ANALYZE statements executed
    pub analyze_runs: u64,
    /// REINDEX statements executed
    pub reindex_runs: u64,
    /// Scheduled maintenance actions that failed after their commit
    pub maintenance_failures: u64,
}

impl TransactionMetrics {
    /// Transactions that reached a physical commit or rollback
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_rolled_back
    }
}

/// Begin/end primitives and statement execution for one worker context
pub struct TransactionManager {
    backend: Backend,
    classifier: ConflictClassifier,
    scope: Option<TransactionScope>,
    pending_analyze: Vec<String>,
    pending_reindex: Vec<String>,
    cache: Arc<QueryCache>,
    max_in_clause: usize,
    metrics: TransactionMetrics,
}

impl TransactionManager {
    /// Open a connection for one worker context, sharing `cache` with the others
    pub fn open(config: &StoreConfig, cache: Arc<QueryCache>) -> Result<Self> {
        config.validate()?;
        let backend = Backend::open(config)?;
        Ok(Self::with_backend(backend, cache, config.max_in_clause))
    }

    /// Open with a private query cache
    pub fn open_standalone(config: &StoreConfig) -> Result<Self> {
        Self::open(config, Arc::new(QueryCache::new(config.cache.max_entries)))
    }

    /// Wrap an already-open backend
    pub fn with_backend(backend: Backend, cache: Arc<QueryCache>, max_in_clause: usize) -> Self {
        TransactionManager {
            classifier: ConflictClassifier::new(backend.kind()),
            backend,
            scope: None,
            pending_analyze: Vec::new(),
            pending_reindex: Vec::new(),
            cache,
            max_in_clause: max_in_clause.max(1),
            metrics: TransactionMetrics::default(),
        }
    }

    /// Backend variant
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// The classifier used for this backend
    pub fn classifier(&self) -> ConflictClassifier {
        self.classifier
    }

    /// Shared query cache
    pub fn cache(&self) -> &Arc<QueryCache> {
        &self.cache
    }

    /// Upper bound on members of one IN (...) list
    pub fn max_in_clause(&self) -> usize {
        self.max_in_clause
    }

    /// Counters so far
    pub fn metrics(&self) -> TransactionMetrics {
        self.metrics
    }

    /// The open scope, if any
    pub fn scope(&self) -> Option<&TransactionScope> {
        self.scope.as_ref()
    }

    /// True while a transaction is open
    pub fn in_transaction(&self) -> bool {
        self.scope.is_some()
    }

    /// Nesting depth of the open transaction (0 = outermost only)
    pub fn depth(&self) -> Option<usize> {
        self.scope.as_ref().map(TransactionScope::depth)
    }

    /// Tables scheduled for ANALYZE after commit
    pub fn pending_analyze(&self) -> &[String] {
        &self.pending_analyze
    }

    /// Tables scheduled for REINDEX after commit
    pub fn pending_reindex(&self) -> &[String] {
        &self.pending_reindex
    }

    fn reinterpret(&self, err: Error) -> Error {
        self.classifier.reinterpret(err)
    }

    // ========================================================================
    // Transaction control
    // ========================================================================

    /// Begin a transaction, or one more nesting level of the open one.
    ///
    /// `Enclosing` inherits the open transaction's isolation, or starts a
    /// ReadCommitted one. Any begin issued while a transaction is open only
    /// increments the depth: SQLite has no nested transactions, and inside a
    /// Serialized scope the suppression is what keeps its ordering intact.
    /// A nested Serialized request inside a ReadCommitted scope therefore runs
    /// at the outer scope's isolation.
    pub fn begin(&mut self, isolation: IsolationLevel) -> Result<()> {
        if let Some(scope) = self.scope.as_mut() {
            if scope.is_serialized() {
                self.metrics.suppressed_begins += 1;
                trace!(depth = scope.depth() + 1, "nested begin suppressed in serialized scope");
            } else if isolation == IsolationLevel::Serialized {
                warn!("serialized begin nested in a read-committed transaction runs at read-committed");
            }
            scope.enter();
            return Ok(());
        }

        let scope = TransactionScope::new(isolation);
        self.backend.begin().map_err(|e| self.reinterpret(e))?;
        if scope.is_serialized() {
            if let Err(e) = self.backend.set_serializable() {
                if let Err(rollback) = self.backend.rollback() {
                    warn!(error = %rollback, "rollback after failed isolation change also failed");
                }
                return Err(self.reinterpret(e));
            }
        }
        debug!(isolation = %scope.isolation(), "transaction started");
        self.metrics.total_started += 1;
        self.scope = Some(scope);
        Ok(())
    }

    /// Ask for the open transaction to be rolled back at its outermost end.
    ///
    /// Ignored inside a nested level of a Serialized scope, whose outermost
    /// level owns the decision. Outside any transaction this does nothing.
    pub fn signal_rollback(&mut self) {
        match self.scope.as_mut() {
            Some(scope) => {
                if !scope.request_rollback() {
                    trace!(depth = scope.depth(), "nested rollback signal ignored in serialized scope");
                }
            }
            None => debug!("rollback signaled with no open transaction"),
        }
    }

    /// End one level of the open transaction.
    ///
    /// At the outermost level this commits, or rolls back if a rollback was
    /// signaled. After a successful commit the collected cache invalidations
    /// are applied and the scheduled maintenance runs. Maintenance failures
    /// are logged and counted but never returned: the work has committed, and
    /// an error here would make the caller run it again. A failed commit is
    /// rolled back and its classified error returned.
    ///
    /// # Errors
    ///
    /// `Error::Programming` if no transaction is open.
    pub fn end(&mut self) -> Result<()> {
        let mut scope = self
            .scope
            .take()
            .ok_or_else(|| Error::programming("end() called with no matching begin()"))?;
        if scope.leave() {
            self.scope = Some(scope);
            return Ok(());
        }

        if scope.rollback_requested() {
            self.discard_pending();
            self.metrics.total_rolled_back += 1;
            debug!("transaction rolled back");
            return self.physical_rollback().map_err(|e| self.reinterpret(e));
        }

        if let Err(e) = self.backend.commit() {
            let err = self.reinterpret(e);
            if let Err(rollback) = self.physical_rollback() {
                warn!(error = %rollback, "rollback after failed commit also failed");
            }
            self.discard_pending();
            self.metrics.total_rolled_back += 1;
            debug!(error = %err, "commit failed");
            return Err(err);
        }
        self.metrics.total_committed += 1;
        debug!("transaction committed");

        for key in scope.into_invalidations() {
            self.cache.invalidate(&key);
        }
        self.run_pending_maintenance();
        Ok(())
    }

    fn physical_rollback(&mut self) -> Result<()> {
        // SQLite may already have rolled back on its own after some errors.
        if self.backend.in_transaction() {
            self.backend.rollback()
        } else {
            Ok(())
        }
    }

    fn discard_pending(&mut self) {
        if !self.pending_analyze.is_empty() || !self.pending_reindex.is_empty() {
            debug!(
                analyze = self.pending_analyze.len(),
                reindex = self.pending_reindex.len(),
                "discarding maintenance scheduled in rolled back transaction"
            );
        }
        self.pending_analyze.clear();
        self.pending_reindex.clear();
    }

    fn run_pending_maintenance(&mut self) {
        for table in std::mem::take(&mut self.pending_analyze) {
            if let Err(e) = self.run_analyze(&table) {
                self.metrics.maintenance_failures += 1;
                warn!(table = %table, error = %e, "scheduled analyze failed after commit");
            }
        }
        for table in std::mem::take(&mut self.pending_reindex) {
            if let Err(e) = self.run_reindex(&table) {
                self.metrics.maintenance_failures += 1;
                warn!(table = %table, error = %e, "scheduled reindex failed after commit");
            }
        }
    }

    /// Run `body` inside one transaction level.
    ///
    /// The level is rolled back if `body` fails. The body's error wins over an
    /// error from `end()`. This is not a retry loop: on
    /// `Error::TransactionAbort` the caller re-runs its whole unit of work.
    pub fn transaction<T, F>(&mut self, isolation: IsolationLevel, body: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.begin(isolation)?;
        let result = body(self);
        if result.is_err() {
            self.signal_rollback();
        }
        let ended = self.end();
        match result {
            Ok(value) => ended.map(|_| value),
            Err(e) => {
                if let Err(end_err) = ended {
                    warn!(error = %end_err, "ending failed transaction also failed");
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Run a modification and invalidate the given cache keys
    pub fn perform_modification(
        &mut self,
        sql: &str,
        params: &[Value],
        kind: StatementKind,
        invalidate: &[&str],
    ) -> Result<usize> {
        let count = self
            .backend
            .execute(sql, params, kind)
            .map_err(|e| self.reinterpret(e))?;
        self.invalidate_keys(invalidate);
        Ok(count)
    }

    /// INSERT one row
    pub fn perform_insert(
        &mut self,
        table: &str,
        values: &[(&str, Value)],
        invalidate: &[&str],
    ) -> Result<usize> {
        check_identifier(table, false)?;
        if values.is_empty() {
            return Err(Error::programming("insert needs at least one column"));
        }
        for (column, _) in values {
            check_identifier(column, false)?;
        }
        let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
        let params: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(","),
            vec!["?"; columns.len()].join(",")
        );
        self.perform_modification(&sql, &params, StatementKind::Insert, invalidate)
    }

    /// UPDATE rows matching `criteria` (all rows if `None`)
    pub fn perform_update(
        &mut self,
        table: &str,
        values: &[(&str, Value)],
        criteria: Option<&SqlFragment>,
        invalidate: &[&str],
    ) -> Result<usize> {
        check_identifier(table, false)?;
        if values.is_empty() {
            return Err(Error::programming("update needs at least one column"));
        }
        let mut assignments = Vec::with_capacity(values.len());
        let mut params = Vec::with_capacity(values.len());
        for (column, value) in values {
            check_identifier(column, false)?;
            assignments.push(format!("{}=?", column));
            params.push(value.clone());
        }
        let mut sql = format!("UPDATE {} SET {}", table, assignments.join(","));
        if let Some(criteria) = criteria {
            sql.push_str(" WHERE ");
            sql.push_str(&criteria.sql);
            params.extend(criteria.params.iter().cloned());
        }
        self.perform_modification(&sql, &params, StatementKind::Update, invalidate)
    }

    /// DELETE rows matching `criteria` (all rows if `None`)
    pub fn perform_delete(
        &mut self,
        table: &str,
        criteria: Option<&SqlFragment>,
        invalidate: &[&str],
    ) -> Result<usize> {
        check_identifier(table, false)?;
        let mut sql = format!("DELETE FROM {}", table);
        let mut params = Vec::new();
        if let Some(criteria) = criteria {
            sql.push_str(" WHERE ");
            sql.push_str(&criteria.sql);
            params.extend(criteria.params.iter().cloned());
        }
        self.perform_modification(&sql, &params, StatementKind::Delete, invalidate)
    }

    /// Run a query.
    ///
    /// With `cache_keys` and no open transaction the result is served from and
    /// stored in the shared cache. Inside a transaction the cache is bypassed,
    /// since the transaction may see its own uncommitted rows.
    pub fn perform_query(
        &mut self,
        sql: &str,
        params: &[Value],
        cache_keys: &[&str],
    ) -> Result<Vec<Row>> {
        if cache_keys.is_empty() || self.scope.is_some() {
            return self.backend.query(sql, params).map_err(|e| self.reinterpret(e));
        }
        if let Some(rows) = self.cache.get(sql, params) {
            return Ok(rows.as_ref().clone());
        }
        let dependencies = self.cache.generations(cache_keys);
        let rows = self
            .backend
            .query(sql, params)
            .map_err(|e| self.reinterpret(e))?;
        self.cache
            .put(sql, params, dependencies, Arc::new(rows.clone()));
        Ok(rows)
    }

    /// Invalidate cache keys now, or at commit if a transaction is open
    pub fn invalidate_keys(&mut self, keys: &[&str]) {
        match self.scope.as_mut() {
            Some(scope) => keys.iter().for_each(|k| scope.note_invalidation(k)),
            None => keys.iter().for_each(|k| self.cache.invalidate(k)),
        }
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Refresh statistics for a table now, or after commit if a transaction is open
    pub fn analyze_table(&mut self, table: &str) -> Result<()> {
        check_identifier(table, false)?;
        if self.scope.is_some() {
            if !self.pending_analyze.iter().any(|t| t == table) {
                trace!(table, "analyze scheduled for commit");
                self.pending_analyze.push(table.to_string());
            }
            return Ok(());
        }
        self.run_analyze(table)
    }

    /// Rebuild a table's indexes now, or after commit if a transaction is open
    pub fn reindex_table(&mut self, table: &str) -> Result<()> {
        check_identifier(table, false)?;
        if self.scope.is_some() {
            if !self.pending_reindex.iter().any(|t| t == table) {
                trace!(table, "reindex scheduled for commit");
                self.pending_reindex.push(table.to_string());
            }
            return Ok(());
        }
        self.run_reindex(table)
    }

    fn run_analyze(&mut self, table: &str) -> Result<()> {
        self.backend.analyze(table).map_err(|e| self.reinterpret(e))?;
        self.metrics.analyze_runs += 1;
        info!(table, "table statistics refreshed");
        Ok(())
    }

    fn run_reindex(&mut self, table: &str) -> Result<()> {
        self.backend.reindex(table).map_err(|e| self.reinterpret(e))?;
        self.metrics.reindex_runs += 1;
        info!(table, "table indexes rebuilt");
        Ok(())
    }

    // ========================================================================
    // Schema operations
    // ========================================================================

    /// Column descriptors, or `None` for a missing table
    pub fn describe_table(&mut self, table: &str) -> Result<Option<TableColumns>> {
        self.backend.describe_table(table).map_err(|e| self.reinterpret(e))
    }

    /// Indexes on a table
    pub fn list_indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>> {
        self.backend.list_indexes(table).map_err(|e| self.reinterpret(e))
    }

    /// CREATE TABLE
    pub fn create_table(&mut self, table: &str, columns: &TableColumns) -> Result<()> {
        self.backend
            .create_table(table, columns)
            .map_err(|e| self.reinterpret(e))
    }

    /// ADD COLUMN
    pub fn add_column(
        &mut self,
        table: &str,
        name: &str,
        description: &ColumnDescription,
        force_null: bool,
    ) -> Result<()> {
        self.backend
            .add_column(table, name, description, force_null)
            .map_err(|e| self.reinterpret(e))
    }

    /// RENAME COLUMN
    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        self.backend
            .rename_column(table, from, to)
            .map_err(|e| self.reinterpret(e))
    }

    /// Copy a column's values into another column
    pub fn copy_column(&mut self, table: &str, to: &str, from: &str) -> Result<()> {
        self.backend
            .copy_column(table, to, from)
            .map_err(|e| self.reinterpret(e))
    }

    /// Make a column NOT NULL
    pub fn enforce_not_null(&mut self, table: &str, column: &str) -> Result<()> {
        self.backend
            .enforce_not_null(table, column)
            .map_err(|e| self.reinterpret(e))
    }

    /// DROP COLUMN
    pub fn drop_column(&mut self, table: &str, name: &str) -> Result<()> {
        self.backend
            .drop_column(table, name)
            .map_err(|e| self.reinterpret(e))
    }

    /// CREATE INDEX
    pub fn create_index(
        &mut self,
        table: &str,
        name: &str,
        description: &IndexDescription,
    ) -> Result<()> {
        self.backend
            .create_index(table, name, description)
            .map_err(|e| self.reinterpret(e))
    }

    /// DROP INDEX
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        self.backend.drop_index(name).map_err(|e| self.reinterpret(e))
    }

    /// DROP TABLE
    pub fn drop_table(&mut self, table: &str) -> Result<()> {
        self.backend.drop_table(table).map_err(|e| self.reinterpret(e))
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        if let Some(scope) = self.scope.take() {
            warn!(depth = scope.depth(), "transaction manager dropped with open transaction");
            if let Err(e) = self.physical_rollback() {
                warn!(error = %e, "rollback on drop failed");
            }
        }
    }
}
