//! Core types for sluice
//!
//! This module defines the portable vocabulary shared by every layer:
//! - IsolationLevel: consistency strength requested for a transaction
//! - Value / Row: parameter and result values, independent of any backend
//! - SqlFragment: a composable piece of SQL plus its parameters
//! - ColumnDescription / IndexDescription: dialect-free schema descriptors

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Consistency strength requested for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Each statement sees data committed before it started
    ReadCommitted,
    /// Transactions behave as if run one at a time
    Serialized,
    /// Inherit whatever level is already active, or ReadCommitted if none
    Enclosing,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationLevel::ReadCommitted => "read-committed",
            IsolationLevel::Serialized => "serialized",
            IsolationLevel::Enclosing => "enclosing",
        };
        f.write_str(name)
    }
}

/// Supported relational backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Embedded SQLite database
    Sqlite,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Sqlite => f.write_str("sqlite"),
        }
    }
}

/// A statement parameter or result value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL
    Null,
    /// 64-bit signed integer
    Int(i64),
    /// Double precision float
    Float(f64),
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
}

impl Value {
    /// The integer payload, if this is an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The text payload, if this is text
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// True for SQL NULL
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// One result row, columns in select order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    /// Build a row from (column, value) pairs
    pub fn new(columns: Vec<(String, Value)>) -> Self {
        Row { columns }
    }

    /// Value of a column by name (case-insensitive)
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
            .map(|(_, value)| value)
    }

    /// Integer column, or a schema mismatch if absent or of another type
    pub fn get_i64(&self, column: &str) -> Result<i64> {
        self.get(column)
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::schema(format!("column '{}' is not an integer", column)))
    }

    /// Text column, or a schema mismatch if absent or of another type
    pub fn get_str(&self, column: &str) -> Result<&str> {
        self.get(column)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::schema(format!("column '{}' is not text", column)))
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True if the row has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A piece of SQL together with the parameters its placeholders bind to
///
/// Fragments are how callers hand filter conditions to the gate, and how the
/// gate hands its eligibility predicate back to external scheduling queries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlFragment {
    /// SQL text using `?` placeholders
    pub sql: String,
    /// Parameters, in placeholder order
    pub params: Vec<Value>,
}

impl SqlFragment {
    /// A fragment with parameters
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        SqlFragment {
            sql: sql.into(),
            params,
        }
    }

    /// A fragment without parameters
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    /// Join two fragments with AND, parameters concatenated in order
    pub fn and(mut self, other: SqlFragment) -> Self {
        if self.sql.is_empty() {
            return other;
        }
        if !other.sql.is_empty() {
            self.sql = format!("({}) AND ({})", self.sql, other.sql);
            self.params.extend(other.params);
        }
        self
    }
}

/// A foreign-key reference from a column to another table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnReference {
    /// Referenced table
    pub table: String,
    /// Referenced column
    pub column: String,
    /// Delete referencing rows when the referenced row is deleted
    pub cascade_on_delete: bool,
}

/// Portable column descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescription {
    /// Portable type name, e.g. `BIGINT`, `VARCHAR(255)`, `LONGTEXT`
    pub type_name: String,
    /// Column accepts NULL
    pub nullable: bool,
    /// Column is (part of) the primary key
    pub primary_key: bool,
    /// Optional foreign-key reference
    pub reference: Option<ColumnReference>,
}

impl ColumnDescription {
    /// A NOT NULL column of the given type
    pub fn new(type_name: impl Into<String>) -> Self {
        ColumnDescription {
            type_name: type_name.into().to_ascii_uppercase(),
            nullable: false,
            primary_key: false,
            reference: None,
        }
    }

    /// Allow NULL
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Mark as primary key column
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Reference another table's column
    pub fn references(
        mut self,
        table: impl Into<String>,
        column: impl Into<String>,
        cascade_on_delete: bool,
    ) -> Self {
        self.reference = Some(ColumnReference {
            table: table.into(),
            column: column.into(),
            cascade_on_delete,
        });
        self
    }
}

/// Columns of a table, in declaration order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TableColumns {
    columns: Vec<(String, ColumnDescription)>,
}

impl TableColumns {
    /// Empty column list
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column (builder style)
    pub fn with(mut self, name: impl Into<String>, description: ColumnDescription) -> Self {
        self.push(name, description);
        self
    }

    /// Append a column
    pub fn push(&mut self, name: impl Into<String>, description: ColumnDescription) {
        self.columns.push((name.into(), description));
    }

    /// Look up a column by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&ColumnDescription> {
        self.columns
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, d)| d)
    }

    /// Mutable lookup by name (case-insensitive)
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ColumnDescription> {
        self.columns
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, d)| d)
    }

    /// Iterate columns in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnDescription)> {
        self.columns.iter().map(|(n, d)| (n.as_str(), d))
    }

    /// Column names in declaration order
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True if there are no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Portable index descriptor
///
/// Two indexes are equal only when both the uniqueness flag and the exact
/// ordered column list match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexDescription {
    /// Unique index
    pub unique: bool,
    /// Indexed columns, in order
    pub columns: Vec<String>,
}

impl IndexDescription {
    /// Create a descriptor
    pub fn new<S: Into<String>>(unique: bool, columns: impl IntoIterator<Item = S>) -> Self {
        IndexDescription {
            unique,
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }
}

/// An index that exists on a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    /// Index name in the store
    pub name: String,
    /// Shape of the index
    pub description: IndexDescription,
    /// The store's implicit primary-key index
    pub primary_key: bool,
}

/// Reject anything that is not a plain SQL identifier
///
/// Table and column names are spliced into statement text, so they must never
/// carry quoting, whitespace or punctuation. Dotted names (`table.column`) are
/// accepted when `allow_qualified` is set.
pub fn check_identifier(name: &str, allow_qualified: bool) -> Result<()> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        }
    };
    let ok = if allow_qualified {
        name.split('.').all(valid_part) && name.split('.').count() <= 2
    } else {
        valid_part(name)
    };
    if ok {
        Ok(())
    } else {
        Err(Error::programming(format!("'{}' is not a valid SQL identifier", name)))
    }
}
