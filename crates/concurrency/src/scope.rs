//! Per-context transaction state

use sluice_core::IsolationLevel;

/// State of the transaction a worker context currently has open.
///
/// Created by the outermost `begin()` and destroyed by the matching `end()`.
/// Owned by exactly one [`TransactionManager`](crate::TransactionManager) and
/// never shared between contexts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionScope {
    isolation: IsolationLevel,
    depth: usize,
    rollback_requested: bool,
    invalidations: Vec<String>,
}

impl TransactionScope {
    /// Scope for a freshly started physical transaction
    ///
    /// `Enclosing` has no meaning for a new scope and resolves to ReadCommitted.
    pub fn new(isolation: IsolationLevel) -> Self {
        let isolation = match isolation {
            IsolationLevel::Enclosing => IsolationLevel::ReadCommitted,
            other => other,
        };
        TransactionScope {
            isolation,
            depth: 0,
            rollback_requested: false,
            invalidations: Vec::new(),
        }
    }

    /// Isolation level in effect; never `Enclosing`
    pub fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    /// Nested begins currently open inside the outermost one
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// True for a Serialized scope
    pub fn is_serialized(&self) -> bool {
        self.isolation == IsolationLevel::Serialized
    }

    /// True once a rollback has been requested
    pub fn rollback_requested(&self) -> bool {
        self.rollback_requested
    }

    /// Cache keys to invalidate when this scope commits
    pub fn invalidations(&self) -> &[String] {
        &self.invalidations
    }

    pub(crate) fn enter(&mut self) {
        self.depth += 1;
    }

    /// Leave one nesting level; false if already at the outermost level
    pub(crate) fn leave(&mut self) -> bool {
        if self.depth == 0 {
            return false;
        }
        self.depth -= 1;
        true
    }

    /// Record a rollback request.
    ///
    /// Inside a Serialized scope only the outermost level decides; a nested
    /// request is ignored and false is returned.
    pub(crate) fn request_rollback(&mut self) -> bool {
        if self.is_serialized() && self.depth > 0 {
            return false;
        }
        self.rollback_requested = true;
        true
    }

    pub(crate) fn note_invalidation(&mut self, key: &str) {
        if !self.invalidations.iter().any(|k| k == key) {
            self.invalidations.push(key.to_string());
        }
    }

    pub(crate) fn into_invalidations(self) -> Vec<String> {
        self.invalidations
    }
}
