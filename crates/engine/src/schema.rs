//! Table schema reconciliation
//!
//! A `SchemaManager` owns the schema of one named table. Every change it makes
//! runs inside one `Enclosing` transaction, so a failure part way through a
//! migration rolls back the steps already taken.

use sluice_concurrency::TransactionManager;
use sluice_core::{
    check_identifier, IndexDescription, IndexInfo, IsolationLevel, Result, TableColumns,
};
use tracing::{debug, info};
use uuid::Uuid;

/// Column name used while a column's type is being changed
const TEMP_COLUMN: &str = "__temp__";

/// Schema operations for one table
#[derive(Debug, Clone)]
pub struct SchemaManager {
    table: String,
}

impl SchemaManager {
    /// Manager for `table`; the name must be a plain SQL identifier
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        check_identifier(&table, false)?;
        Ok(SchemaManager { table })
    }

    /// Managed table
    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Current columns, or `None` if the table does not exist
    pub fn table_columns(&self, db: &mut TransactionManager) -> Result<Option<TableColumns>> {
        db.describe_table(&self.table)
    }

    /// Current indexes, the primary-key index included
    pub fn table_indexes(&self, db: &mut TransactionManager) -> Result<Vec<IndexInfo>> {
        db.list_indexes(&self.table)
    }

    /// Create the table
    pub fn create_table(&self, db: &mut TransactionManager, columns: &TableColumns) -> Result<()> {
        check_columns(columns)?;
        db.transaction(IsolationLevel::Enclosing, |db| db.create_table(&self.table, columns))?;
        info!(table = %self.table, columns = columns.len(), "table created");
        Ok(())
    }

    /// Add columns, creating them nullable and then tightening NOT NULL ones
    pub fn add_columns(&self, db: &mut TransactionManager, columns: &TableColumns) -> Result<()> {
        self.alter(db, Some(columns), None, &[])
    }

    /// Change column types without an in-place destructive change
    pub fn modify_columns(&self, db: &mut TransactionManager, columns: &TableColumns) -> Result<()> {
        self.alter(db, None, Some(columns), &[])
    }

    /// Drop columns
    pub fn drop_columns(&self, db: &mut TransactionManager, names: &[&str]) -> Result<()> {
        self.alter(db, None, None, names)
    }

    /// Add, modify and drop columns as one unit.
    ///
    /// Each modified column is renamed to a temporary name, recreated with the
    /// target type, filled from the temporary column, made NOT NULL if
    /// required, and the temporary column dropped.
    pub fn alter(
        &self,
        db: &mut TransactionManager,
        add: Option<&TableColumns>,
        modify: Option<&TableColumns>,
        drop: &[&str],
    ) -> Result<()> {
        if let Some(columns) = add {
            check_columns(columns)?;
        }
        if let Some(columns) = modify {
            check_columns(columns)?;
        }
        for name in drop {
            check_identifier(name, false)?;
        }

        db.transaction(IsolationLevel::Enclosing, |db| {
            if let Some(columns) = add {
                for (name, description) in columns.iter() {
                    debug!(table = %self.table, column = name, "adding column");
                    db.add_column(&self.table, name, description, true)?;
                    if !description.nullable {
                        db.enforce_not_null(&self.table, name)?;
                    }
                }
            }
            if let Some(columns) = modify {
                for (name, description) in columns.iter() {
                    debug!(table = %self.table, column = name, "modifying column");
                    db.rename_column(&self.table, name, TEMP_COLUMN)?;
                    db.add_column(&self.table, name, description, true)?;
                    db.copy_column(&self.table, name, TEMP_COLUMN)?;
                    if !description.nullable {
                        db.enforce_not_null(&self.table, name)?;
                    }
                    db.drop_column(&self.table, TEMP_COLUMN)?;
                }
            }
            for name in drop {
                debug!(table = %self.table, column = name, "dropping column");
                db.drop_column(&self.table, name)?;
            }
            Ok(())
        })
    }

    /// Create an index under a generated name, returning the name
    pub fn add_index(
        &self,
        db: &mut TransactionManager,
        description: &IndexDescription,
    ) -> Result<String> {
        for column in &description.columns {
            check_identifier(column, false)?;
        }
        let name = format!("I{}", Uuid::new_v4().simple());
        db.create_index(&self.table, &name, description)?;
        debug!(table = %self.table, index = %name, "index created");
        Ok(name)
    }

    /// Drop an index by name
    pub fn remove_index(&self, db: &mut TransactionManager, name: &str) -> Result<()> {
        check_identifier(name, false)?;
        db.drop_index(name)
    }

    /// Make the table's secondary indexes exactly `required`.
    ///
    /// An existing index is kept only if its uniqueness and ordered column list
    /// match a required one; anything else is dropped. The primary-key index
    /// is never touched. Missing indexes are created.
    pub fn reconcile_indexes(
        &self,
        db: &mut TransactionManager,
        required: &[IndexDescription],
    ) -> Result<()> {
        let mut missing: Vec<&IndexDescription> = required.iter().collect();
        db.transaction(IsolationLevel::Enclosing, |db| {
            for index in self.table_indexes(db)? {
                if index.primary_key {
                    continue;
                }
                match missing.iter().position(|d| **d == index.description) {
                    Some(found) => {
                        missing.remove(found);
                    }
                    None => {
                        info!(table = %self.table, index = %index.name, "dropping unexpected index");
                        db.drop_index(&index.name)?;
                    }
                }
            }
            for description in &missing {
                self.add_index(db, description)?;
            }
            Ok(())
        })
    }

    /// Drop the table
    pub fn drop_table(&self, db: &mut TransactionManager) -> Result<()> {
        db.transaction(IsolationLevel::Enclosing, |db| db.drop_table(&self.table))?;
        info!(table = %self.table, "table dropped");
        Ok(())
    }
}

fn check_columns(columns: &TableColumns) -> Result<()> {
    for (name, description) in columns.iter() {
        check_identifier(name, false)?;
        if let Some(reference) = &description.reference {
            check_identifier(&reference.table, false)?;
            check_identifier(&reference.column, false)?;
        }
    }
    Ok(())
}
