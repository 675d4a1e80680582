//! Owner Table Schema Change Tests
//!
//! Tightening a column of a table that other tables reference keeps every
//! referencing row and every reference.

use crate::common::*;
use sluice::GATE_TABLE;

fn tighten_status(db: &mut TransactionManager) {
    SchemaManager::new("jobqueue")
        .unwrap()
        .modify_columns(
            db,
            &TableColumns::new().with("status", ColumnDescription::new("CHAR(1)")),
        )
        .unwrap();
}

#[test]
fn modify_owner_column_keeps_gate_rows() {
    let store = TestStore::new();
    let gate = store.with_jobs([1, 2]);
    let mut db = store.context();
    gate.add_events(&mut db, 1, &["a", "b"]).unwrap();
    gate.add_events(&mut db, 2, &["a"]).unwrap();

    tighten_status(&mut db);

    let status = db.describe_table("jobqueue").unwrap().unwrap();
    assert!(!status.get("status").unwrap().nullable);
    assert_eq!(row_count(&mut db, GATE_TABLE), 3);
    assert_eq!(gate.event_names(&mut db, 1).unwrap().len(), 2);

    // The restricting reference still guards the owner rows.
    let err = db.perform_delete("jobqueue", None, &[]).unwrap_err();
    assert!(!err.is_retryable());
    assert_eq!(row_count(&mut db, "jobqueue"), 2);
}

#[test]
fn modify_owner_column_keeps_cascading_children() {
    let store = TestStore::new();
    let mut db = store.context();
    create_jobqueue(&mut db);
    db.perform_insert("jobqueue", &[("id", Value::Int(1)), ("status", Value::from("P"))], &[])
        .unwrap();
    SchemaManager::new("notes")
        .unwrap()
        .create_table(
            &mut db,
            &TableColumns::new()
                .with("id", ColumnDescription::new("BIGINT").primary_key())
                .with("job", ColumnDescription::new("BIGINT").references("jobqueue", "id", true)),
        )
        .unwrap();
    db.perform_insert("notes", &[("id", Value::Int(10)), ("job", Value::Int(1))], &[])
        .unwrap();

    tighten_status(&mut db);

    assert_eq!(row_count(&mut db, "notes"), 1);
    let notes = db.describe_table("notes").unwrap().unwrap();
    assert_eq!(notes.get("job").unwrap().reference.as_ref().unwrap().table, "jobqueue");

    // Cascading still works against the tightened table.
    db.perform_delete("jobqueue", None, &[]).unwrap();
    assert_eq!(row_count(&mut db, "notes"), 0);
}

#[test]
fn other_contexts_see_tightened_column() {
    let store = TestStore::new();
    let _gate = store.with_jobs([1]);
    let mut a = store.context();
    let mut b = store.context();
    assert!(b.describe_table("jobqueue").unwrap().unwrap().get("status").unwrap().nullable);

    tighten_status(&mut a);

    let err = b
        .perform_insert("jobqueue", &[("id", Value::Int(2))], &[])
        .unwrap_err();
    assert!(!err.is_retryable());
    assert!(!b.describe_table("jobqueue").unwrap().unwrap().get("status").unwrap().nullable);
}
