//! Error types for sluice
//!
//! Every failure surfaced by the coordination layer is one of four kinds:
//!
//! - `SchemaMismatch`: DDL or configuration problems
//! - `TransactionAbort`: a retryable conflict, produced only by the conflict classifier
//! - `Connection`: a failure raised by the backing store; fatal unless reclassified
//! - `Programming`: caller misuse (unbalanced `end()`, bad identifiers, ...)
//!
//! Backend-native errors never cross this boundary directly. They are wrapped in a
//! [`StoreFailure`], which carries a [`DiagnosticCode`] the classifier can inspect
//! plus the original error as an opaque source.

use std::fmt;
use thiserror::Error;

/// Result type alias for sluice operations
pub type Result<T> = std::result::Result<T, Error>;

/// Plain tag describing which kind of error occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// DDL or configuration error
    SchemaMismatch,
    /// Retryable conflict; re-run the whole transaction body
    TransactionAbort,
    /// Store-level failure that was not recognized as a conflict
    ConnectionError,
    /// Caller misuse of the API
    ProgrammingError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::SchemaMismatch => "schema mismatch",
            ErrorKind::TransactionAbort => "transaction abort",
            ErrorKind::ConnectionError => "connection error",
            ErrorKind::ProgrammingError => "programming error",
        };
        f.write_str(name)
    }
}

/// Why a transaction was aborted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictClass {
    /// Concurrent serializable transactions could not be ordered
    SerializationFailure,
    /// The store refused to wait on a lock held by another transaction
    Deadlock,
    /// An insert raced another context inserting the same logical row
    DuplicateKey,
}

impl fmt::Display for ConflictClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictClass::SerializationFailure => "serialization failure",
            ConflictClass::Deadlock => "deadlock",
            ConflictClass::DuplicateKey => "duplicate key",
        };
        f.write_str(name)
    }
}

/// The kind of statement a store failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// SELECT and catalog reads
    Query,
    /// INSERT
    Insert,
    /// UPDATE
    Update,
    /// DELETE
    Delete,
    /// CREATE / ALTER / DROP / ANALYZE / REINDEX
    Definition,
    /// Transaction control (begin, commit, rollback, isolation pragmas)
    Control,
}

/// Backend diagnostic code attached to a store failure
///
/// Only the conflict classifier interprets these values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    /// SQLite extended result code
    Sqlite(i32),
    /// The failure did not come with a backend code
    None,
}

/// A failure raised by the backing store
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StoreFailure {
    /// Statement that failed
    pub statement: StatementKind,
    /// Backend diagnostic code, if any
    pub code: DiagnosticCode,
    /// Human-readable message
    pub message: String,
    /// Original backend error
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl StoreFailure {
    /// Create a failure with no wrapped source
    pub fn new(statement: StatementKind, code: DiagnosticCode, message: impl Into<String>) -> Self {
        StoreFailure {
            statement,
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the original backend error
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

/// Error type for sluice
#[derive(Debug, Error)]
pub enum Error {
    /// DDL or configuration error
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// Retryable conflict detected by the store
    #[error("Transaction aborted ({conflict}): {cause}")]
    TransactionAbort {
        /// Conflict class that triggered the abort
        conflict: ConflictClass,
        /// The store failure that was reclassified
        #[source]
        cause: StoreFailure,
    },

    /// Store failure that is not a recognized conflict
    #[error("Connection error: {0}")]
    Connection(#[from] StoreFailure),

    /// Caller misuse of the API
    #[error("Programming error: {0}")]
    Programming(String),
}

impl Error {
    /// Shorthand for a schema mismatch
    pub fn schema(message: impl Into<String>) -> Self {
        Error::SchemaMismatch(message.into())
    }

    /// Shorthand for a programming error
    pub fn programming(message: impl Into<String>) -> Self {
        Error::Programming(message.into())
    }

    /// The kind tag of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SchemaMismatch(_) => ErrorKind::SchemaMismatch,
            Error::TransactionAbort { .. } => ErrorKind::TransactionAbort,
            Error::Connection(_) => ErrorKind::ConnectionError,
            Error::Programming(_) => ErrorKind::ProgrammingError,
        }
    }

    /// True when the caller should re-run the whole transaction body
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransactionAbort { .. })
    }

    /// Conflict class, for aborts
    pub fn conflict(&self) -> Option<ConflictClass> {
        match self {
            Error::TransactionAbort { conflict, .. } => Some(*conflict),
            _ => None,
        }
    }

    /// The underlying store failure, for connection errors and aborts
    pub fn store_failure(&self) -> Option<&StoreFailure> {
        match self {
            Error::TransactionAbort { cause, .. } => Some(cause),
            Error::Connection(failure) => Some(failure),
            _ => None,
        }
    }
}
