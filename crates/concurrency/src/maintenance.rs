//! Self-throttling table maintenance
//!
//! A `MaintenanceCounter` counts mutations down toward zero. When it reaches
//! zero exactly one caller wins `check_action()`, performs the physical action
//! and reloads the counter with `note_action()`. Counters are the only state
//! several worker contexts mutate directly, so each one is guarded by a
//! `parking_lot::Mutex`.
//!
//! A `MaintenanceTracker` pairs a statistics counter with an index-rebuild
//! counter for one table. It is owned by the component managing that table and
//! shared by reference; there are no process-wide trackers.

use crate::manager::TransactionManager;
use parking_lot::Mutex;
use sluice_core::{MaintenanceConfig, Result};
use tracing::debug;

#[derive(Debug)]
struct CounterState {
    remaining: u64,
    busy: bool,
}

/// Countdown to the next maintenance action
#[derive(Debug)]
pub struct MaintenanceCounter {
    state: Mutex<CounterState>,
}

impl MaintenanceCounter {
    /// Counter with `initial` events left before the first action
    pub fn new(initial: u64) -> Self {
        MaintenanceCounter {
            state: Mutex::new(CounterState {
                remaining: initial,
                busy: false,
            }),
        }
    }

    /// Counter pre-loaded at half the threshold
    pub fn preloaded(threshold: u64) -> Self {
        Self::new(threshold / 2)
    }

    /// Record one event
    pub fn note_event(&self) {
        self.note_events(1);
    }

    /// Record `count` events, flooring at zero
    pub fn note_events(&self, count: u64) {
        let mut state = self.state.lock();
        state.remaining = state.remaining.saturating_sub(count);
    }

    /// True exactly once per firing: remaining has hit zero and no action is pending.
    ///
    /// The caller that receives `true` owns the action and must call
    /// [`note_action`](Self::note_action) when done, whether or not the
    /// action succeeded.
    pub fn check_action(&self) -> bool {
        let mut state = self.state.lock();
        if state.busy {
            return false;
        }
        state.busy = state.remaining == 0;
        state.busy
    }

    /// Reload to a full threshold and clear busy
    pub fn note_action(&self, threshold: u64) {
        let mut state = self.state.lock();
        state.remaining = threshold;
        state.busy = false;
    }

    /// Events left before the next action
    pub fn remaining(&self) -> u64 {
        self.state.lock().remaining
    }

    /// True while an action is owned by some caller
    pub fn is_busy(&self) -> bool {
        self.state.lock().busy
    }
}

/// Statistics and index-rebuild counters for one table
#[derive(Debug)]
pub struct MaintenanceTracker {
    table: String,
    thresholds: MaintenanceConfig,
    analyze: MaintenanceCounter,
    reindex: MaintenanceCounter,
}

impl MaintenanceTracker {
    /// Tracker for `table`, both counters pre-loaded at half their threshold
    pub fn new(table: impl Into<String>, thresholds: MaintenanceConfig) -> Self {
        MaintenanceTracker {
            table: table.into(),
            analyze: MaintenanceCounter::preloaded(thresholds.analyze_threshold),
            reindex: MaintenanceCounter::preloaded(thresholds.reindex_threshold),
            thresholds,
        }
    }

    /// Table this tracker maintains
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Record inserted rows
    pub fn note_inserts(&self, rows: u64) {
        self.analyze.note_events(rows);
    }

    /// Record one delete call
    pub fn note_removal(&self) {
        self.reindex.note_event();
    }

    /// Statistics-refresh counter
    pub fn analyze_counter(&self) -> &MaintenanceCounter {
        &self.analyze
    }

    /// Index-rebuild counter
    pub fn reindex_counter(&self) -> &MaintenanceCounter {
        &self.reindex
    }

    /// Run whichever actions are due.
    ///
    /// Inside an open transaction the actions are only scheduled; the manager
    /// runs them after the outermost commit. Each counter is reloaded even if
    /// its action fails, and the first failure is returned.
    pub fn conditionally_maintain(&self, db: &mut TransactionManager) -> Result<()> {
        let mut result = Ok(());
        if self.analyze.check_action() {
            debug!(table = %self.table, "statistics refresh due");
            result = db.analyze_table(&self.table);
            self.analyze.note_action(self.thresholds.analyze_threshold);
        }
        if self.reindex.check_action() {
            debug!(table = %self.table, "index rebuild due");
            let reindexed = db.reindex_table(&self.table);
            self.reindex.note_action(self.thresholds.reindex_threshold);
            if result.is_ok() {
                result = reindexed;
            }
        }
        result
    }
}
