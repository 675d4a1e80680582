//! Backend capability set
//!
//! The set of supported stores is closed, so dispatch is a plain enum rather
//! than a trait object. Each variant exposes the same capabilities; callers
//! never branch on the variant except through [`Backend::kind`].

use crate::sqlite::SqliteBackend;
use sluice_core::{
    BackendKind, ColumnDescription, IndexDescription, IndexInfo, Result, Row, StatementKind,
    StoreConfig, TableColumns, Value,
};

/// A connection to one supported relational store
pub enum Backend {
    /// Embedded SQLite
    Sqlite(SqliteBackend),
}

macro_rules! dispatch {
    ($self:ident, $b:ident => $call:expr) => {
        match $self {
            Backend::Sqlite($b) => $call,
        }
    };
}

impl Backend {
    /// Open the backend named by the config
    pub fn open(config: &StoreConfig) -> Result<Self> {
        match config.backend {
            BackendKind::Sqlite => Ok(Backend::Sqlite(SqliteBackend::open(config)?)),
        }
    }

    /// Which store this is
    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Sqlite(_) => BackendKind::Sqlite,
        }
    }

    /// True while a physical transaction is open
    pub fn in_transaction(&self) -> bool {
        dispatch!(self, b => b.in_transaction())
    }

    /// Start a physical transaction
    pub fn begin(&mut self) -> Result<()> {
        dispatch!(self, b => b.begin())
    }

    /// Commit the physical transaction
    pub fn commit(&mut self) -> Result<()> {
        dispatch!(self, b => b.commit())
    }

    /// Roll back the physical transaction
    pub fn rollback(&mut self) -> Result<()> {
        dispatch!(self, b => b.rollback())
    }

    /// Raise the open transaction to serializable isolation
    pub fn set_serializable(&mut self) -> Result<()> {
        dispatch!(self, b => b.set_serializable())
    }

    /// Run a modification statement
    pub fn execute(&mut self, sql: &str, params: &[Value], kind: StatementKind) -> Result<usize> {
        dispatch!(self, b => b.execute(sql, params, kind))
    }

    /// Run a query
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        dispatch!(self, b => b.query(sql, params))
    }

    /// Refresh planner statistics
    pub fn analyze(&mut self, table: &str) -> Result<()> {
        dispatch!(self, b => b.analyze(table))
    }

    /// Rebuild indexes
    pub fn reindex(&mut self, table: &str) -> Result<()> {
        dispatch!(self, b => b.reindex(table))
    }

    /// Column descriptors, or `None` for a missing table
    pub fn describe_table(&mut self, table: &str) -> Result<Option<TableColumns>> {
        dispatch!(self, b => b.describe_table(table))
    }

    /// Indexes on a table
    pub fn list_indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>> {
        dispatch!(self, b => b.list_indexes(table))
    }

    /// Create a table
    pub fn create_table(&mut self, table: &str, columns: &TableColumns) -> Result<()> {
        dispatch!(self, b => b.create_table(table, columns))
    }

    /// Add a column
    pub fn add_column(
        &mut self,
        table: &str,
        name: &str,
        description: &ColumnDescription,
        force_null: bool,
    ) -> Result<()> {
        dispatch!(self, b => b.add_column(table, name, description, force_null))
    }

    /// Rename a column
    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        dispatch!(self, b => b.rename_column(table, from, to))
    }

    /// Copy values between columns of every row
    pub fn copy_column(&mut self, table: &str, to: &str, from: &str) -> Result<()> {
        dispatch!(self, b => b.copy_column(table, to, from))
    }

    /// Declare a column NOT NULL; fails with a schema mismatch if NULLs exist
    pub fn enforce_not_null(&mut self, table: &str, column: &str) -> Result<()> {
        dispatch!(self, b => b.enforce_not_null(table, column))
    }

    /// Drop a column
    pub fn drop_column(&mut self, table: &str, name: &str) -> Result<()> {
        dispatch!(self, b => b.drop_column(table, name))
    }

    /// Create an index
    pub fn create_index(
        &mut self,
        table: &str,
        name: &str,
        description: &IndexDescription,
    ) -> Result<()> {
        dispatch!(self, b => b.create_index(table, name, description))
    }

    /// Drop an index
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        dispatch!(self, b => b.drop_index(name))
    }

    /// Drop a table
    pub fn drop_table(&mut self, table: &str) -> Result<()> {
        dispatch!(self, b => b.drop_table(table))
    }
}
