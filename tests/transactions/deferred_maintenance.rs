//! Deferred Maintenance Tests
//!
//! ANALYZE/REINDEX requested inside a transaction run only after the
//! outermost commit, and never after a rollback.

use crate::common::*;

fn small_thresholds(config: &mut StoreConfig) {
    config.maintenance = MaintenanceConfig {
        analyze_threshold: 6,
        reindex_threshold: 2,
    };
}

#[test]
fn maintenance_waits_for_outermost_commit() {
    let store = TestStore::with_config(small_thresholds);
    let gate = store.with_jobs(1..=3);
    let mut db = store.context();

    db.begin(IsolationLevel::Serialized).unwrap();
    gate.add_events(&mut db, 1, &["a", "b", "c"]).unwrap();
    db.begin(IsolationLevel::Enclosing).unwrap();
    gate.conditionally_maintain_tables(&mut db).unwrap();
    db.end().unwrap();
    assert_eq!(db.pending_analyze(), &["prereqevents"]);
    assert_eq!(db.metrics().analyze_runs, 0);

    db.end().unwrap();
    assert!(db.pending_analyze().is_empty());
    assert_eq!(db.metrics().analyze_runs, 1);
    assert!(!gate.tracker().analyze_counter().is_busy());
}

#[test]
fn maintenance_dropped_on_rollback() {
    let store = TestStore::with_config(small_thresholds);
    let gate = store.with_jobs(1..=3);
    let mut db = store.context();

    db.begin(IsolationLevel::ReadCommitted).unwrap();
    gate.remove_events(&mut db, 1).unwrap();
    gate.conditionally_maintain_tables(&mut db).unwrap();
    assert_eq!(db.pending_reindex(), &["prereqevents"]);
    db.signal_rollback();
    db.end().unwrap();

    assert!(db.pending_reindex().is_empty());
    assert_eq!(db.metrics().reindex_runs, 0);
    // The counter was reloaded when the action was handed off.
    assert_eq!(gate.tracker().reindex_counter().remaining(), 2);
}

#[test]
fn maintenance_runs_immediately_outside_transactions() {
    let store = TestStore::with_config(small_thresholds);
    let gate = store.with_jobs(1..=3);
    let mut db = store.context();

    gate.remove_events(&mut db, 2).unwrap();
    gate.conditionally_maintain_tables(&mut db).unwrap();
    assert_eq!(db.metrics().reindex_runs, 1);
    gate.conditionally_maintain_tables(&mut db).unwrap();
    assert_eq!(db.metrics().reindex_runs, 1);
}

#[test]
fn counters_are_shared_across_contexts() {
    let store = TestStore::with_config(small_thresholds);
    let gate = store.with_jobs(1..=3);
    let mut a = store.context();
    let mut b = store.context();

    gate.add_events(&mut a, 1, &["x"]).unwrap();
    gate.add_events(&mut b, 2, &["x", "y"]).unwrap();
    assert_eq!(gate.tracker().analyze_counter().remaining(), 0);

    gate.conditionally_maintain_tables(&mut a).unwrap();
    gate.conditionally_maintain_tables(&mut b).unwrap();
    assert_eq!(a.metrics().analyze_runs + b.metrics().analyze_runs, 1);
}

#[test]
fn maintenance_failure_after_commit_is_not_an_abort() {
    let store = TestStore::new();
    let _gate = store.with_jobs([1]);
    let mut a = store.context();
    let mut b = store.context();

    // b holds the write lock, so a's ANALYZE cannot run.
    b.begin(IsolationLevel::Serialized).unwrap();
    b.perform_insert("jobqueue", &[("id", Value::Int(2)), ("status", Value::from("P"))], &[])
        .unwrap();

    a.begin(IsolationLevel::Serialized).unwrap();
    a.analyze_table("jobqueue").unwrap();
    a.end().unwrap();

    let metrics = a.metrics();
    assert_eq!(metrics.total_committed, 1);
    assert_eq!(metrics.analyze_runs, 0);
    assert_eq!(metrics.maintenance_failures, 1);
    assert!(a.pending_analyze().is_empty());
    assert!(!a.in_transaction());

    b.end().unwrap();
    a.analyze_table("jobqueue").unwrap();
    assert_eq!(a.metrics().analyze_runs, 1);
}
