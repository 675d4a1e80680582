//! Nesting Tests
//!
//! Only the outermost end() of a Serialized scope has a physical effect.

use crate::common::*;
use proptest::prelude::*;

#[test]
fn inner_end_does_not_publish_writes() {
    let store = TestStore::new();
    let mut a = store.context();
    let mut b = store.context();
    create_jobqueue(&mut a);

    a.begin(IsolationLevel::Serialized).unwrap();
    a.begin(IsolationLevel::Enclosing).unwrap();
    a.perform_insert("jobqueue", &[("id", Value::Int(1))], &[]).unwrap();
    a.end().unwrap();
    assert_eq!(row_count(&mut b, "jobqueue"), 0);

    a.end().unwrap();
    assert_eq!(row_count(&mut b, "jobqueue"), 1);
}

#[test]
fn inner_failure_then_outer_rollback_discards_everything() {
    let store = TestStore::new();
    let mut db = store.context();
    create_jobqueue(&mut db);

    let result = db.transaction(IsolationLevel::Serialized, |db| {
        db.perform_insert("jobqueue", &[("id", Value::Int(1))], &[])?;
        db.transaction(IsolationLevel::ReadCommitted, |db| {
            db.perform_insert("jobqueue", &[("id", Value::Int(1))], &[])
        })
    });

    let err = result.err().expect("duplicate insert must fail");
    assert!(err.is_retryable());
    assert!(!db.in_transaction());
    assert_eq!(row_count(&mut db, "jobqueue"), 0);
}

#[test]
fn unbalanced_end_is_programming_error() {
    let store = TestStore::new();
    let mut db = store.context();
    db.begin(IsolationLevel::ReadCommitted).unwrap();
    db.end().unwrap();
    let err = db.end().unwrap_err();
    assert_eq!(err.kind(), sluice::ErrorKind::ProgrammingError);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn one_physical_completion_per_outermost_scope(
        inner in proptest::collection::vec(
            prop_oneof![
                Just(IsolationLevel::ReadCommitted),
                Just(IsolationLevel::Serialized),
                Just(IsolationLevel::Enclosing),
            ],
            0..10,
        ),
        rollback_at in proptest::option::of(0usize..10),
    ) {
        let store = TestStore::new();
        let mut db = store.context();

        db.begin(IsolationLevel::Serialized).unwrap();
        for isolation in &inner {
            db.begin(*isolation).unwrap();
        }
        for depth in (0..=inner.len()).rev() {
            if rollback_at == Some(depth) {
                db.signal_rollback();
            }
            prop_assert_eq!(db.metrics().total_completed(), 0);
            db.end().unwrap();
        }

        let metrics = db.metrics();
        prop_assert_eq!(metrics.total_started, 1);
        prop_assert_eq!(metrics.total_completed(), 1);
        prop_assert_eq!(metrics.suppressed_begins, inner.len() as u64);
        // Only a signal at the outermost level counts.
        prop_assert_eq!(metrics.total_rolled_back, u64::from(rollback_at == Some(0)));
    }
}
