//! SQLite backend
//!
//! Runs parameterized statements on one `rusqlite::Connection` and renders the
//! portable schema descriptors into SQLite DDL. Every failure is returned as a
//! raw `Error::Connection` carrying the SQLite extended result code; deciding
//! whether that code means "retry" is left to the conflict classifier.

use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OpenFlags};
use sluice_core::{
    ColumnDescription, ColumnReference, DiagnosticCode, Error, IndexDescription, IndexInfo,
    Result, Row, StatementKind, StoreConfig, StoreFailure, TableColumns, Value,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Savepoint wrapping an in-place table definition rewrite.
const REWRITE_SAVEPOINT: &str = "sluice_rewrite";

/// SQLite connection owned by exactly one worker context
pub struct SqliteBackend {
    conn: Connection,
    /// A table definition was rewritten inside the open transaction
    definition_rewritten: bool,
}

impl SqliteBackend {
    /// Open the database named by the config and apply its pragmas
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let in_memory = config.path == Path::new(":memory:");
        let conn = if in_memory {
            Connection::open_in_memory()
        } else {
            Connection::open_with_flags(
                &config.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
            )
        }
        .map_err(|e| store_error(StatementKind::Control, e))?;

        Self::configure_connection(&conn, config, in_memory)?;
        debug!(path = %config.path.display(), "opened sqlite backend");
        Ok(SqliteBackend {
            conn,
            definition_rewritten: false,
        })
    }

    fn configure_connection(conn: &Connection, cfg: &StoreConfig, in_memory: bool) -> Result<()> {
        if !in_memory {
            conn.pragma_update(None, "journal_mode", cfg.journal_mode.pragma_value())
                .map_err(|e| store_error(StatementKind::Control, e))?;
        }
        conn.pragma_update(None, "foreign_keys", if cfg.foreign_keys { "ON" } else { "OFF" })
            .map_err(|e| store_error(StatementKind::Control, e))?;
        // rusqlite installs a 5s busy handler by default; lock waits are policy here.
        conn.busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))
            .map_err(|e| store_error(StatementKind::Control, e))?;
        Ok(())
    }

    /// True while a physical transaction is open on this connection
    pub fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    /// Start a physical transaction
    pub fn begin(&mut self) -> Result<()> {
        self.control("BEGIN")
    }

    /// Commit the physical transaction
    pub fn commit(&mut self) -> Result<()> {
        self.control("COMMIT")?;
        self.definition_rewritten = false;
        Ok(())
    }

    /// Roll back the physical transaction
    pub fn rollback(&mut self) -> Result<()> {
        self.control("ROLLBACK")?;
        if std::mem::take(&mut self.definition_rewritten) {
            // Drop the cached copy of the discarded definition.
            self.control("PRAGMA writable_schema = RESET")?;
        }
        Ok(())
    }

    /// Apply the serializable isolation pragma to the open transaction
    pub fn set_serializable(&mut self) -> Result<()> {
        self.control("PRAGMA read_uncommitted = 0")
    }

    fn control(&mut self, sql: &str) -> Result<()> {
        trace!(sql, "control statement");
        self.conn
            .execute_batch(sql)
            .map_err(|e| store_error(StatementKind::Control, e))
    }

    /// Run a parameterized modification, returning affected rows
    pub fn execute(&mut self, sql: &str, params: &[Value], kind: StatementKind) -> Result<usize> {
        trace!(sql, params = params.len(), "execute");
        self.conn
            .execute(sql, params_from_iter(params.iter().map(to_sqlite)))
            .map_err(|e| store_error(kind, e))
    }

    /// Run a parameterized query
    pub fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        trace!(sql, params = params.len(), "query");
        let map = |e: rusqlite::Error| store_error(StatementKind::Query, e);
        let mut stmt = self.conn.prepare(sql).map_err(map)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(params_from_iter(params.iter().map(to_sqlite)))
            .map_err(map)?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(map)? {
            let mut columns = Vec::with_capacity(names.len());
            for (i, name) in names.iter().enumerate() {
                let value = from_sqlite(row.get_ref(i).map_err(map)?);
                columns.push((name.clone(), value));
            }
            result.push(Row::new(columns));
        }
        Ok(result)
    }

    fn definition(&mut self, sql: &str) -> Result<()> {
        debug!(sql, "definition statement");
        self.execute(sql, &[], StatementKind::Definition).map(|_| ())
    }

    /// Refresh planner statistics for a table
    pub fn analyze(&mut self, table: &str) -> Result<()> {
        self.definition(&format!("ANALYZE {}", table))
    }

    /// Rebuild all indexes of a table
    pub fn reindex(&mut self, table: &str) -> Result<()> {
        self.definition(&format!("REINDEX {}", table))
    }

    /// Describe a table's columns, or `None` if the table does not exist
    pub fn describe_table(&mut self, table: &str) -> Result<Option<TableColumns>> {
        let rows = self.query(
            "SELECT name, type, \"notnull\" AS not_null, pk FROM pragma_table_info(?1) ORDER BY cid",
            &[Value::from(table)],
        )?;
        if rows.is_empty() {
            return Ok(None);
        }
        let references = self.query(
            "SELECT \"from\" AS from_column, \"table\" AS ref_table, \"to\" AS ref_column, on_delete \
             FROM pragma_foreign_key_list(?1)",
            &[Value::from(table)],
        )?;

        let mut columns = TableColumns::new();
        for row in &rows {
            let name = row.get_str("name")?;
            let mut description = ColumnDescription::new(portable_type(row.get_str("type")?));
            description.nullable = row.get_i64("not_null")? == 0;
            description.primary_key = row.get_i64("pk")? > 0;
            for reference in &references {
                if reference.get_str("from_column")?.eq_ignore_ascii_case(name) {
                    description.reference = Some(ColumnReference {
                        table: reference.get_str("ref_table")?.to_string(),
                        column: reference.get_str("ref_column")?.to_string(),
                        cascade_on_delete: reference
                            .get_str("on_delete")?
                            .eq_ignore_ascii_case("CASCADE"),
                    });
                }
            }
            columns.push(name, description);
        }
        Ok(Some(columns))
    }

    /// List the indexes that exist on a table
    pub fn list_indexes(&mut self, table: &str) -> Result<Vec<IndexInfo>> {
        let rows = self.query(
            "SELECT name, \"unique\" AS is_unique, origin FROM pragma_index_list(?1) ORDER BY name",
            &[Value::from(table)],
        )?;
        let mut indexes = Vec::with_capacity(rows.len());
        for row in rows {
            let name = row.get_str("name")?.to_string();
            let columns = self
                .query(
                    "SELECT name FROM pragma_index_info(?1) ORDER BY seqno",
                    &[Value::from(name.as_str())],
                )?
                .iter()
                .filter_map(|r| r.get("name").and_then(Value::as_str).map(String::from))
                .collect::<Vec<_>>();
            indexes.push(IndexInfo {
                description: IndexDescription::new(row.get_i64("is_unique")? != 0, columns),
                primary_key: row.get_str("origin")? == "pk",
                name,
            });
        }
        Ok(indexes)
    }

    /// CREATE TABLE from portable descriptors
    pub fn create_table(&mut self, table: &str, columns: &TableColumns) -> Result<()> {
        self.definition(&create_table_sql(table, columns))
    }

    /// ADD COLUMN; `force_null` declares the column nullable regardless of the descriptor
    pub fn add_column(
        &mut self,
        table: &str,
        name: &str,
        description: &ColumnDescription,
        force_null: bool,
    ) -> Result<()> {
        let column = column_sql(name, description, force_null, true);
        self.definition(&format!("ALTER TABLE {} ADD COLUMN {}", table, column))
    }

    /// RENAME COLUMN
    pub fn rename_column(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        self.definition(&format!("ALTER TABLE {} RENAME COLUMN {} TO {}", table, from, to))
    }

    /// Copy every row's value from one column to another
    pub fn copy_column(&mut self, table: &str, to: &str, from: &str) -> Result<()> {
        let sql = format!("UPDATE {} SET {}={}", table, to, from);
        self.execute(&sql, &[], StatementKind::Update).map(|_| ())
    }

    /// DROP COLUMN, dropping secondary indexes that cover it first
    pub fn drop_column(&mut self, table: &str, name: &str) -> Result<()> {
        // SQLite refuses to drop an indexed column.
        for index in self.list_indexes(table)? {
            let covers = index.description.columns.iter().any(|c| c.eq_ignore_ascii_case(name));
            if covers && !index.primary_key {
                self.drop_index(&index.name)?;
            }
        }
        self.definition(&format!("ALTER TABLE {} DROP COLUMN {}", table, name))
    }

    /// Declare an existing column NOT NULL.
    ///
    /// SQLite cannot change a column constraint through ALTER TABLE. After
    /// checking that no NULLs exist, the stored CREATE TABLE text is replaced
    /// with the tightened declaration and the table is integrity-checked. Rows,
    /// indexes and references from other tables are left where they are.
    pub fn enforce_not_null(&mut self, table: &str, column: &str) -> Result<()> {
        let nulls = self.query(
            &format!("SELECT COUNT(*) AS n FROM {} WHERE {} IS NULL", table, column),
            &[],
        )?;
        let null_count = nulls.first().map(|r| r.get_i64("n")).transpose()?.unwrap_or(0);
        if null_count > 0 {
            return Err(Error::schema(format!(
                "cannot make {}.{} NOT NULL: {} row(s) hold NULL",
                table, column, null_count
            )));
        }

        let mut columns = self
            .describe_table(table)?
            .ok_or_else(|| Error::schema(format!("table {} does not exist", table)))?;
        match columns.get_mut(column) {
            Some(description) if !description.nullable => return Ok(()),
            Some(description) => description.nullable = false,
            None => {
                return Err(Error::schema(format!(
                    "table {} has no column {}",
                    table, column
                )))
            }
        }

        self.control(&format!("SAVEPOINT {}", REWRITE_SAVEPOINT))?;
        match self.rewrite_definition(table, &create_table_sql(table, &columns)) {
            Ok(()) => {
                self.control(&format!("RELEASE {}", REWRITE_SAVEPOINT))?;
                self.definition_rewritten |= self.in_transaction();
                Ok(())
            }
            Err(e) => {
                let undo = format!("ROLLBACK TO {0}; RELEASE {0}", REWRITE_SAVEPOINT);
                if let Err(undo_err) = self.control(&undo) {
                    warn!(table, error = %undo_err, "undoing table definition rewrite failed");
                }
                if let Err(reset_err) = self.control("PRAGMA writable_schema = RESET") {
                    warn!(table, error = %reset_err, "schema reload failed");
                }
                Err(e)
            }
        }
    }

    /// Replace a table's stored definition without moving its rows.
    ///
    /// The new definition must describe the same columns in the same order.
    /// The schema version is bumped so other connections reload it.
    fn rewrite_definition(&mut self, table: &str, sql: &str) -> Result<()> {
        let version = self
            .query("PRAGMA schema_version", &[])?
            .first()
            .map(|r| r.get_i64("schema_version"))
            .transpose()?
            .unwrap_or(0);

        self.control("PRAGMA writable_schema = ON")?;
        let rewritten = self
            .execute(
                "UPDATE sqlite_master SET sql = ?1 WHERE type = 'table' AND name = ?2 COLLATE NOCASE",
                &[Value::from(sql), Value::from(table)],
                StatementKind::Definition,
            )
            .and_then(|updated| match updated {
                1 => self.control(&format!("PRAGMA schema_version = {}", version + 1)),
                _ => Err(Error::schema(format!("table {} does not exist", table))),
            });
        // RESET also reloads this connection's copy of the schema.
        let reset = self.control("PRAGMA writable_schema = RESET");
        rewritten?;
        reset?;
        debug!(sql, "table definition rewritten");

        let problems: Vec<String> = self
            .query(&format!("PRAGMA integrity_check({})", table), &[])?
            .iter()
            .filter_map(|r| r.get("integrity_check").and_then(Value::as_str).map(String::from))
            .filter(|line| line != "ok")
            .collect();
        if !problems.is_empty() {
            return Err(Error::schema(format!(
                "table {} failed integrity check after rewrite: {}",
                table,
                problems.join("; ")
            )));
        }
        Ok(())
    }

    /// CREATE INDEX
    pub fn create_index(
        &mut self,
        table: &str,
        name: &str,
        description: &IndexDescription,
    ) -> Result<()> {
        let unique = if description.unique { "UNIQUE " } else { "" };
        self.definition(&format!(
            "CREATE {}INDEX {} ON {} ({})",
            unique,
            name,
            table,
            description.columns.join(",")
        ))
    }

    /// DROP INDEX
    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        self.definition(&format!("DROP INDEX {}", name))
    }

    /// DROP TABLE
    pub fn drop_table(&mut self, table: &str) -> Result<()> {
        self.definition(&format!("DROP TABLE {}", table))
    }
}

/// Wrap a rusqlite error as a raw store failure
fn store_error(statement: StatementKind, err: rusqlite::Error) -> Error {
    let code = match &err {
        rusqlite::Error::SqliteFailure(e, _) => DiagnosticCode::Sqlite(e.extended_code),
        _ => DiagnosticCode::None,
    };
    Error::Connection(StoreFailure::new(statement, code, err.to_string()).with_source(err))
}

fn to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Int(v) => SqliteValue::Integer(*v),
        Value::Float(v) => SqliteValue::Real(*v),
        Value::Text(v) => SqliteValue::Text(v.clone()),
        Value::Bytes(v) => SqliteValue::Blob(v.clone()),
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Int(v),
        ValueRef::Real(v) => Value::Float(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Bytes(v.to_vec()),
    }
}

/// Map a portable type name to the SQLite declaration
fn sqlite_type(portable: &str) -> &str {
    if portable.eq_ignore_ascii_case("LONGTEXT") {
        "TEXT"
    } else {
        portable
    }
}

/// Map a declared SQLite type back to its portable name
fn portable_type(declared: &str) -> String {
    if declared.eq_ignore_ascii_case("TEXT") {
        "LONGTEXT".to_string()
    } else {
        declared.to_ascii_uppercase()
    }
}

fn column_sql(name: &str, cd: &ColumnDescription, force_null: bool, inline_pk: bool) -> String {
    let mut sql = format!("{} {}", name, sqlite_type(&cd.type_name));
    if force_null || cd.nullable {
        sql.push_str(" NULL");
    } else {
        sql.push_str(" NOT NULL");
    }
    if cd.primary_key && inline_pk {
        sql.push_str(" PRIMARY KEY");
    }
    if let Some(reference) = &cd.reference {
        sql.push_str(&format!(
            " REFERENCES {}({}) ON DELETE {}",
            reference.table,
            reference.column,
            if reference.cascade_on_delete { "CASCADE" } else { "RESTRICT" }
        ));
    }
    sql
}

fn create_table_sql(table: &str, columns: &TableColumns) -> String {
    let pk: Vec<&str> = columns
        .iter()
        .filter(|(_, cd)| cd.primary_key)
        .map(|(name, _)| name)
        .collect();
    let inline_pk = pk.len() == 1;
    let mut parts: Vec<String> = columns
        .iter()
        .map(|(name, cd)| column_sql(name, cd, false, inline_pk))
        .collect();
    if pk.len() > 1 {
        parts.push(format!("PRIMARY KEY ({})", pk.join(",")));
    }
    format!("CREATE TABLE {} ({})", table, parts.join(","))
}
