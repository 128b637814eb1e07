/*
    Store management on a single manager

    Covers registration, forwarded tables, the sqlite backend, store
    clearing and query cancellation.
*/

use peerbus_core::core_host::{HostTable, Type, Val};
use peerbus_core::core_store::{
    BackendOptions, BackendType, QueryOutcome, RoleKind, StoreError, TableEdit,
};
use peerbus_core::core_transport::MeshNetwork;
use peerbus_core::core_wire::Data;
use peerbus_core::test_utils::{outcome_slot, simulated_manager};
use peerbus_core::ManagerError;
use tempfile::tempdir;

#[test]
fn test_duplicate_master_keeps_first_handle() {
    let network = MeshNetwork::new();
    let mut mgr = simulated_manager(&network);
    let first = mgr
        .make_master("x", BackendType::Memory, &BackendOptions::default())
        .unwrap();

    let err = mgr
        .make_master("x", BackendType::Memory, &BackendOptions::default())
        .unwrap_err();
    assert!(matches!(err, ManagerError::Store(StoreError::AlreadyExists(_))));
    assert_eq!(mgr.lookup_store("x"), Some(first.clone()));
    assert_eq!(mgr.store_role(&first).unwrap(), RoleKind::Master);
    mgr.store_put(&first, Data::from("a"), Data::Count(1), None)
        .unwrap();
}

#[test]
fn test_forwarded_table_reflects_mutation_immediately() {
    let network = MeshNetwork::new();
    let mut mgr = simulated_manager(&network);
    let table = HostTable::new(Type::String, Type::Count).shared();
    mgr.add_forwarded_store("x", table.clone()).unwrap();
    assert!(matches!(
        mgr.add_forwarded_store("x", table.clone()),
        Err(ManagerError::Store(StoreError::AlreadyForwarded(_)))
    ));

    let handle = mgr
        .make_master("x", BackendType::Memory, &BackendOptions::default())
        .unwrap();
    mgr.store_put(&handle, Data::from("alice"), Data::Count(3), None)
        .unwrap();

    // No process() in between
    let entry = table.borrow().get(&Val::from("alice")).cloned();
    assert_eq!(entry.and_then(|e| e.value), Some(Val::Count(3)));

    mgr.forward_table_edit(
        "x",
        TableEdit::Remove {
            key: Val::from("alice"),
        },
    )
    .unwrap();
    assert!(table.borrow().is_empty());

    assert!(mgr.close_store("x"));
    assert!(mgr.forwarded_table("x").is_none());
}

#[test]
fn test_sqlite_master_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let options = BackendOptions::with_path(dir.path().join("users.sqlite"));
    let network = MeshNetwork::new();

    {
        let mut mgr = simulated_manager(&network);
        let handle = mgr
            .make_master("users", BackendType::Sqlite, &options)
            .unwrap();
        mgr.store_put(&handle, Data::from("alice"), Data::from("admin"), None)
            .unwrap();
        mgr.terminate();
    }

    let mut mgr = simulated_manager(&network);
    let handle = mgr
        .make_master("users", BackendType::Sqlite, &options)
        .unwrap();
    let (slot, callback) = outcome_slot();
    mgr.store_get(&handle, Data::from("alice"), callback).unwrap();
    mgr.process();
    assert_eq!(*slot.borrow(), vec![QueryOutcome::Success(Data::from("admin"))]);
}

#[test]
fn test_clear_stores_cancels_every_query_once() {
    let network = MeshNetwork::new();
    let mut mgr = simulated_manager(&network);
    let a = mgr
        .make_master("a", BackendType::Memory, &BackendOptions::default())
        .unwrap();
    let b = mgr
        .make_master("b", BackendType::Memory, &BackendOptions::default())
        .unwrap();

    let (tracked, callback) = outcome_slot();
    mgr.track_store_query(&a, 1000, callback).unwrap();
    let (asked, callback) = outcome_slot();
    mgr.store_keys(&b, callback).unwrap();

    assert_eq!(mgr.clear_stores(), 2);
    assert_eq!(mgr.stats().num_stores, 0);
    assert_eq!(mgr.stats().num_pending_queries, 0);

    let timeout = mgr.config().manager.query_timeout.as_secs_f64();
    mgr.advance_time(timeout + 1.0).unwrap();
    mgr.process();
    assert_eq!(*tracked.borrow(), vec![QueryOutcome::Cancelled]);
    assert_eq!(*asked.borrow(), vec![QueryOutcome::Cancelled]);
}

#[test]
fn test_dropping_manager_cancels_queries() {
    let network = MeshNetwork::new();
    let (slot, callback) = outcome_slot();
    {
        let mut mgr = simulated_manager(&network);
        let handle = mgr
            .make_master("a", BackendType::Memory, &BackendOptions::default())
            .unwrap();
        mgr.track_store_query(&handle, 1, callback).unwrap();
    }
    assert_eq!(*slot.borrow(), vec![QueryOutcome::Cancelled]);
}
