//! Conflict classification
//!
//! The single place where backend diagnostic codes are interpreted. A store
//! failure whose code signals a concurrency conflict is rewritten into
//! `Error::TransactionAbort`; everything else passes through untouched.
//!
//! # SQLite mapping
//!
//! | Extended code                  | Condition              | Class                |
//! |--------------------------------|------------------------|----------------------|
//! | 517 `SQLITE_BUSY_SNAPSHOT`     | any statement          | SerializationFailure |
//! | primary 5 `SQLITE_BUSY`        | any statement          | Deadlock             |
//! | primary 6 `SQLITE_LOCKED`      | any statement          | Deadlock             |
//! | 1555 `CONSTRAINT_PRIMARYKEY`   | insert statements only | DuplicateKey         |
//! | 2067 `CONSTRAINT_UNIQUE`       | insert statements only | DuplicateKey         |

use sluice_core::{BackendKind, ConflictClass, DiagnosticCode, Error, StatementKind, StoreFailure};
use tracing::debug;

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;
const SQLITE_BUSY_SNAPSHOT: i32 = SQLITE_BUSY | (2 << 8);
const SQLITE_CONSTRAINT_PRIMARYKEY: i32 = 19 | (6 << 8);
const SQLITE_CONSTRAINT_UNIQUE: i32 = 19 | (8 << 8);

/// Maps store failures to retryable conflicts for one backend
#[derive(Debug, Clone, Copy)]
pub struct ConflictClassifier {
    backend: BackendKind,
}

impl ConflictClassifier {
    /// Classifier for the given backend
    pub fn new(backend: BackendKind) -> Self {
        ConflictClassifier { backend }
    }

    /// Backend this classifier understands
    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Conflict class of a failure, or `None` if it is not a conflict
    pub fn classify(&self, failure: &StoreFailure) -> Option<ConflictClass> {
        match (self.backend, failure.code) {
            (BackendKind::Sqlite, DiagnosticCode::Sqlite(code)) => {
                classify_sqlite(code, failure.statement)
            }
            (_, DiagnosticCode::None) => None,
        }
    }

    /// Rewrite a conflict into `Error::TransactionAbort`.
    ///
    /// Any other error, including conflicts that are already aborts, is
    /// returned unchanged.
    pub fn reinterpret(&self, err: Error) -> Error {
        match err {
            Error::Connection(failure) => match self.classify(&failure) {
                Some(conflict) => {
                    debug!(%conflict, code = ?failure.code, "store failure reclassified as abort");
                    Error::TransactionAbort {
                        conflict,
                        cause: failure,
                    }
                }
                None => Error::Connection(failure),
            },
            other => other,
        }
    }
}

fn classify_sqlite(code: i32, statement: StatementKind) -> Option<ConflictClass> {
    if code == SQLITE_BUSY_SNAPSHOT {
        return Some(ConflictClass::SerializationFailure);
    }
    match code & 0xff {
        SQLITE_BUSY | SQLITE_LOCKED => return Some(ConflictClass::Deadlock),
        _ => {}
    }
    // Outside an insert a uniqueness violation is an ordinary failure.
    if statement == StatementKind::Insert
        && (code == SQLITE_CONSTRAINT_PRIMARYKEY || code == SQLITE_CONSTRAINT_UNIQUE)
    {
        return Some(ConflictClass::DuplicateKey);
    }
    None
}
