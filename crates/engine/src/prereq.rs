//! Prerequisite events
//!
//! A prerequisite event is a named condition attached to an owning record,
//! typically a queued job. While any event rows exist for an owner the owner
//! is not eligible for processing. Schedulers embed
//! [`PrerequisiteGate::eligibility_predicate`] in their own queries instead of
//! asking the gate about each candidate.
//!
//! Storage is one table:
//!
//! ```text
//! prereqevents
//!   owner      BIGINT        references the owning table
//!   eventname  VARCHAR(255)
//!   PRIMARY KEY (owner, eventname)
//!   non-unique index on (owner)
//! ```
//!
//! The primary key is what turns two contexts adding the same event at once
//! into a duplicate-key abort instead of a duplicated row.

use crate::schema::SchemaManager;
use sluice_concurrency::{MaintenanceTracker, TransactionManager};
use sluice_core::{
    check_identifier, ColumnDescription, Error, IndexDescription, IsolationLevel,
    MaintenanceConfig, Result, SqlFragment, TableColumns, Value,
};
use tracing::{debug, info};

/// Gate table name
pub const GATE_TABLE: &str = "prereqevents";
/// Owner id column
pub const OWNER_COLUMN: &str = "owner";
/// Event name column
pub const EVENT_NAME_COLUMN: &str = "eventname";
/// Longest accepted event name, in characters
pub const MAX_EVENT_NAME_LEN: usize = 255;

const CACHE_KEYS: &[&str] = &[GATE_TABLE];

/// Owners whose events are removed together
#[derive(Debug, Clone, Copy)]
pub enum OwnerSet<'a> {
    /// Explicit owner ids
    Ids(&'a [i64]),
    /// A sub-select yielding owner ids
    Query(&'a SqlFragment),
}

/// Named-condition rows gating owning records
#[derive(Debug)]
pub struct PrerequisiteGate {
    schema: SchemaManager,
    tracker: MaintenanceTracker,
}

impl PrerequisiteGate {
    /// Gate using the given maintenance thresholds
    pub fn new(maintenance: MaintenanceConfig) -> Result<Self> {
        Ok(PrerequisiteGate {
            schema: SchemaManager::new(GATE_TABLE)?,
            tracker: MaintenanceTracker::new(GATE_TABLE, maintenance),
        })
    }

    /// Gate table name
    pub fn table_name(&self) -> &str {
        self.schema.table_name()
    }

    /// Cache keys invalidated by every gate mutation
    pub fn cache_keys(&self) -> &'static [&'static str] {
        CACHE_KEYS
    }

    /// Maintenance counters for the gate table
    pub fn tracker(&self) -> &MaintenanceTracker {
        &self.tracker
    }

    /// Create or upgrade the gate table.
    ///
    /// Creates the table if missing. Either way the table's secondary indexes
    /// are reconciled to exactly the owner index. Running it again changes
    /// nothing.
    pub fn install(
        &self,
        db: &mut TransactionManager,
        owner_table: &str,
        owner_column: &str,
    ) -> Result<()> {
        check_identifier(owner_table, false)?;
        check_identifier(owner_column, false)?;

        db.transaction(IsolationLevel::Enclosing, |db| {
            match self.schema.table_columns(db)? {
                None => {
                    let columns = TableColumns::new()
                        .with(
                            OWNER_COLUMN,
                            ColumnDescription::new("BIGINT")
                                .primary_key()
                                .references(owner_table, owner_column, false),
                        )
                        .with(
                            EVENT_NAME_COLUMN,
                            ColumnDescription::new(format!("VARCHAR({})", MAX_EVENT_NAME_LEN))
                                .primary_key(),
                        );
                    self.schema.create_table(db, &columns)?;
                }
                Some(existing) => {
                    for column in [OWNER_COLUMN, EVENT_NAME_COLUMN] {
                        if existing.get(column).is_none() {
                            return Err(Error::schema(format!(
                                "existing table {} has no column {}",
                                GATE_TABLE, column
                            )));
                        }
                    }
                }
            }
            self.schema
                .reconcile_indexes(db, &[IndexDescription::new(false, [OWNER_COLUMN])])
        })?;
        info!(table = GATE_TABLE, owner_table, "prerequisite gate installed");
        Ok(())
    }

    /// Drop the gate table
    pub fn uninstall(&self, db: &mut TransactionManager) -> Result<()> {
        self.schema.drop_table(db)?;
        db.invalidate_keys(CACHE_KEYS);
        info!(table = GATE_TABLE, "prerequisite gate removed");
        Ok(())
    }

    /// Attach events to an owner.
    ///
    /// Not idempotent: adding an event the owner already has fails with a
    /// duplicate-key `Error::TransactionAbort`. A caller retrying after such an
    /// abort should check [`event_names`](Self::event_names) first.
    pub fn add_events(&self, db: &mut TransactionManager, owner: i64, names: &[&str]) -> Result<()> {
        if names.is_empty() {
            return Ok(());
        }
        for name in names {
            if name.chars().count() > MAX_EVENT_NAME_LEN {
                return Err(Error::programming(format!(
                    "event name longer than {} characters",
                    MAX_EVENT_NAME_LEN
                )));
            }
        }

        db.transaction(IsolationLevel::Enclosing, |db| {
            for name in names {
                db.perform_insert(
                    GATE_TABLE,
                    &[
                        (OWNER_COLUMN, Value::Int(owner)),
                        (EVENT_NAME_COLUMN, Value::from(*name)),
                    ],
                    CACHE_KEYS,
                )?;
            }
            Ok(())
        })?;
        self.tracker.note_inserts(names.len() as u64);
        debug!(owner, events = names.len(), "prerequisite events added");
        Ok(())
    }

    /// Remove every event of one owner
    pub fn remove_events(&self, db: &mut TransactionManager, owner: i64) -> Result<()> {
        let criteria = SqlFragment::new(format!("{}=?", OWNER_COLUMN), vec![Value::Int(owner)]);
        db.perform_delete(GATE_TABLE, Some(&criteria), CACHE_KEYS)?;
        self.tracker.note_removal();
        Ok(())
    }

    /// Remove every event of a set of owners.
    ///
    /// Explicit id lists are split into IN (...) lists no longer than the
    /// manager's `max_in_clause`, all inside one transaction.
    pub fn remove_events_in(&self, db: &mut TransactionManager, owners: OwnerSet<'_>) -> Result<()> {
        match owners {
            OwnerSet::Ids([]) => return Ok(()),
            OwnerSet::Ids(ids) => {
                let chunk_size = db.max_in_clause();
                db.transaction(IsolationLevel::Enclosing, |db| {
                    for chunk in ids.chunks(chunk_size) {
                        let criteria = SqlFragment::new(
                            format!("{} IN ({})", OWNER_COLUMN, vec!["?"; chunk.len()].join(",")),
                            chunk.iter().copied().map(Value::Int).collect(),
                        );
                        db.perform_delete(GATE_TABLE, Some(&criteria), CACHE_KEYS)?;
                    }
                    Ok(())
                })?;
            }
            OwnerSet::Query(query) => {
                let criteria = SqlFragment::new(
                    format!("{} IN ({})", OWNER_COLUMN, query.sql),
                    query.params.clone(),
                );
                db.perform_delete(GATE_TABLE, Some(&criteria), CACHE_KEYS)?;
            }
        }
        self.tracker.note_removal();
        Ok(())
    }

    /// Remove events whose owner row in `owner_table` matches `criteria`.
    ///
    /// `join_column` is the owning table's id column; `criteria` is an
    /// optional extra condition over the owning table.
    pub fn remove_events_matching(
        &self,
        db: &mut TransactionManager,
        owner_table: &str,
        join_column: &str,
        criteria: Option<&SqlFragment>,
    ) -> Result<()> {
        check_identifier(owner_table, false)?;
        check_identifier(join_column, true)?;

        let mut sql = format!(
            "EXISTS(SELECT 'x' FROM {} WHERE {}={}.{}",
            owner_table, join_column, GATE_TABLE, OWNER_COLUMN
        );
        let mut params = Vec::new();
        if let Some(criteria) = criteria {
            sql.push_str(&format!(" AND ({})", criteria.sql));
            params.extend(criteria.params.iter().cloned());
        }
        sql.push(')');
        db.perform_delete(GATE_TABLE, Some(&SqlFragment::new(sql, params)), CACHE_KEYS)?;
        self.tracker.note_removal();
        Ok(())
    }

    /// Condition true for owners with no events.
    ///
    /// `owner_expr` is the column holding the owner id in the caller's query,
    /// e.g. `jobqueue.id`.
    pub fn eligibility_predicate(&self, owner_expr: &str) -> Result<SqlFragment> {
        check_identifier(owner_expr, true)?;
        Ok(SqlFragment::raw(predicate_sql(owner_expr)))
    }

    /// Names of an owner's events, sorted
    pub fn event_names(&self, db: &mut TransactionManager, owner: i64) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT {name} FROM {table} WHERE {owner}=? ORDER BY {name}",
            name = EVENT_NAME_COLUMN,
            table = GATE_TABLE,
            owner = OWNER_COLUMN
        );
        db.perform_query(&sql, &[Value::Int(owner)], CACHE_KEYS)?
            .iter()
            .map(|row| row.get_str(EVENT_NAME_COLUMN).map(String::from))
            .collect()
    }

    /// True if the owner has no events
    pub fn is_eligible(&self, db: &mut TransactionManager, owner: i64) -> Result<bool> {
        let sql = format!("SELECT 1 AS eligible WHERE {}", predicate_sql("?"));
        let rows = db.perform_query(&sql, &[Value::Int(owner)], CACHE_KEYS)?;
        Ok(!rows.is_empty())
    }

    /// Run statistics refresh or index rebuild on the gate table if due.
    ///
    /// Expected once per processed batch.
    pub fn conditionally_maintain_tables(&self, db: &mut TransactionManager) -> Result<()> {
        self.tracker.conditionally_maintain(db)
    }
}

fn predicate_sql(owner_expr: &str) -> String {
    format!(
        "NOT EXISTS(SELECT 'x' FROM {table} WHERE {table}.{owner}={expr})",
        table = GATE_TABLE,
        owner = OWNER_COLUMN,
        expr = owner_expr
    )
}
