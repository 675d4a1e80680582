//! Removal Tests
//!
//! The three removal forms and their effect on the index-rebuild counter.

use crate::common::*;
use sluice::{OwnerSet, SqlFragment};

fn seed(gate: &PrerequisiteGate, db: &mut TransactionManager, owners: impl IntoIterator<Item = i64>) {
    for owner in owners {
        gate.add_events(db, owner, &["a", "b"]).unwrap();
    }
}

#[test]
fn remove_single_owner() {
    let store = TestStore::new();
    let gate = store.with_jobs(1..=2);
    let mut db = store.context();
    seed(&gate, &mut db, 1..=2);

    gate.remove_events(&mut db, 1).unwrap();
    assert!(gate.event_names(&mut db, 1).unwrap().is_empty());
    assert_eq!(gate.event_names(&mut db, 2).unwrap(), vec!["a", "b"]);
}

#[test]
fn remove_id_list_larger_than_in_clause() {
    let store = TestStore::with_config(|c| c.max_in_clause = 3);
    let gate = store.with_jobs(1..=10);
    let mut db = store.context();
    seed(&gate, &mut db, 1..=10);
    let before = gate.tracker().reindex_counter().remaining();

    let ids: Vec<i64> = (1..=8).collect();
    gate.remove_events_in(&mut db, OwnerSet::Ids(&ids)).unwrap();

    assert_eq!(row_count(&mut db, "prereqevents"), 4);
    assert_eq!(gate.tracker().reindex_counter().remaining(), before - 1);
}

#[test]
fn remove_empty_id_list_is_noop() {
    let store = TestStore::new();
    let gate = store.with_jobs([1]);
    let mut db = store.context();
    seed(&gate, &mut db, [1]);
    let before = gate.tracker().reindex_counter().remaining();

    gate.remove_events_in(&mut db, OwnerSet::Ids(&[])).unwrap();
    assert_eq!(row_count(&mut db, "prereqevents"), 2);
    assert_eq!(gate.tracker().reindex_counter().remaining(), before);
}

#[test]
fn remove_by_owner_subquery() {
    let store = TestStore::new();
    let gate = store.with_jobs(1..=4);
    let mut db = store.context();
    seed(&gate, &mut db, 1..=4);
    db.perform_update(
        "jobqueue",
        &[("status", Value::from("C"))],
        Some(&SqlFragment::new("id<=?", vec![Value::Int(2)])),
        &["jobqueue"],
    )
    .unwrap();

    let done = SqlFragment::new("SELECT id FROM jobqueue WHERE status=?", vec![Value::from("C")]);
    gate.remove_events_in(&mut db, OwnerSet::Query(&done)).unwrap();

    assert!(gate.is_eligible(&mut db, 1).unwrap());
    assert!(gate.is_eligible(&mut db, 2).unwrap());
    assert!(!gate.is_eligible(&mut db, 3).unwrap());
}

#[test]
fn remove_by_correlated_owner_criteria() {
    let store = TestStore::new();
    let gate = store.with_jobs(1..=4);
    let mut db = store.context();
    seed(&gate, &mut db, 1..=4);

    let criteria = SqlFragment::new("jobqueue.id>?", vec![Value::Int(2)]);
    gate.remove_events_matching(&mut db, "jobqueue", "jobqueue.id", Some(&criteria))
        .unwrap();

    assert_eq!(row_count(&mut db, "prereqevents"), 4);
    assert!(!gate.is_eligible(&mut db, 2).unwrap());
    assert!(gate.is_eligible(&mut db, 3).unwrap());
}

#[test]
fn removal_inside_rolled_back_transaction_is_undone() {
    let store = TestStore::new();
    let gate = store.with_jobs([1]);
    let mut db = store.context();
    seed(&gate, &mut db, [1]);

    let result: sluice::Result<()> = db.transaction(IsolationLevel::ReadCommitted, |db| {
        gate.remove_events(db, 1)?;
        Err(Error::programming("caller gave up"))
    });
    assert!(result.is_err());
    assert_eq!(gate.event_names(&mut db, 1).unwrap(), vec!["a", "b"]);
}
