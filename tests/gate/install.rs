//! Install / Uninstall Tests

use crate::common::*;
use sluice::{IndexDescription, GATE_TABLE};

#[test]
fn install_twice_is_identical() {
    let store = TestStore::new();
    let gate = store.with_jobs([]);
    let mut db = store.context();
    let columns = db.describe_table(GATE_TABLE).unwrap().unwrap();
    let indexes = db.list_indexes(GATE_TABLE).unwrap();

    gate.install(&mut db, "jobqueue", "id").unwrap();

    assert_eq!(db.describe_table(GATE_TABLE).unwrap().unwrap(), columns);
    assert_eq!(db.list_indexes(GATE_TABLE).unwrap(), indexes);
    let owner = columns.get("owner").unwrap();
    assert_eq!(owner.type_name, "BIGINT");
    assert_eq!(owner.reference.as_ref().unwrap().table, "jobqueue");
    assert_eq!(columns.get("eventname").unwrap().type_name, "VARCHAR(255)");
}

#[test]
fn install_repairs_index_set() {
    let store = TestStore::new();
    let gate = store.with_jobs([]);
    let mut db = store.context();
    let original: Vec<_> = db
        .list_indexes(GATE_TABLE)
        .unwrap()
        .into_iter()
        .filter(|i| !i.primary_key)
        .collect();
    db.drop_index(&original[0].name).unwrap();
    db.create_index(GATE_TABLE, "owner_event", &IndexDescription::new(false, ["owner", "eventname"]))
        .unwrap();

    gate.install(&mut db, "jobqueue", "id").unwrap();

    let secondary: Vec<_> = db
        .list_indexes(GATE_TABLE)
        .unwrap()
        .into_iter()
        .filter(|i| !i.primary_key)
        .collect();
    assert_eq!(secondary.len(), 1);
    assert_eq!(secondary[0].description, IndexDescription::new(false, ["owner"]));
}

#[test]
fn install_rejects_unusable_existing_table() {
    let store = TestStore::new();
    let mut db = store.context();
    create_jobqueue(&mut db);
    SchemaManager::new(GATE_TABLE)
        .unwrap()
        .create_table(
            &mut db,
            &TableColumns::new().with("owner", ColumnDescription::new("BIGINT")),
        )
        .unwrap();

    let err = store.gate().install(&mut db, "jobqueue", "id").unwrap_err();
    assert_eq!(err.kind(), sluice::ErrorKind::SchemaMismatch);
}

#[test]
fn uninstall_drops_table() {
    let store = TestStore::new();
    let gate = store.with_jobs([1]);
    let mut db = store.context();
    gate.add_events(&mut db, 1, &["x"]).unwrap();

    gate.uninstall(&mut db).unwrap();
    assert!(db.describe_table(GATE_TABLE).unwrap().is_none());

    gate.install(&mut db, "jobqueue", "id").unwrap();
    assert!(gate.is_eligible(&mut db, 1).unwrap());
}

#[test]
fn owner_identifiers_are_validated() {
    let store = TestStore::new();
    let mut db = store.context();
    let err = store
        .gate()
        .install(&mut db, "jobqueue(id); --", "id")
        .unwrap_err();
    assert_eq!(err.kind(), sluice::ErrorKind::ProgrammingError);
}
