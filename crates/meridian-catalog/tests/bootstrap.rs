//! Group bootstrap, replica identity, and drop protocol.

mod common;

use common::{open_replica, start_replica, test_settings};

use meridian_catalog::{LogEntry, ReplicationError};
use meridian_coord::{Coordinator, MemoryCoordination};

/// A single replica against an empty coordination path creates the whole
/// group schema and registers itself with one heartbeat entry.
#[tokio::test]
async fn solo_bootstrap_creates_group_schema() {
    let store = MemoryCoordination::new();
    let node = start_replica(&store, "/g", "s1", "r1", "host-a", test_settings())
        .await
        .unwrap();

    let observer = store.session();
    for path in ["/g/log", "/g/replicas", "/g/counter", "/g/metadata"] {
        assert!(observer.exists(path).await.unwrap(), "{path} must exist");
    }
    assert_eq!(observer.get("/g/max_log_ptr").await.unwrap(), "1");
    assert_eq!(observer.get("/g/logs_to_keep").await.unwrap(), "1000");

    // The registration value is the node's host id.
    let host_id = observer.get("/g/replicas/s1|r1").await.unwrap();
    assert_eq!(host_id, node.catalog.host_id().to_string());
    assert!(host_id.starts_with("host-a:9000:"));

    // Exactly one entry: the registration heartbeat.
    let entries = observer.children("/g/log").await.unwrap();
    assert_eq!(entries, vec!["query-0000000001".to_string()]);
    let entry = LogEntry::parse(
        &observer.get("/g/log/query-0000000001").await.unwrap(),
    )
    .unwrap();
    assert!(entry.is_heartbeat());
}

/// A second node claiming the same shard|replica name with a different host
/// id must be rejected without touching the registration.
#[tokio::test]
async fn duplicate_identity_is_rejected() {
    let store = MemoryCoordination::new();
    let _a = start_replica(&store, "/g", "s1", "r1", "host-a", test_settings())
        .await
        .unwrap();

    let observer = store.session();
    let before = observer.get("/g/replicas/s1|r1").await.unwrap();

    let result = open_replica(&store, "/g", "s1", "r1", "host-b", test_settings()).await;
    match result {
        Err(ReplicationError::ReplicaAlreadyExists { replica, .. }) => {
            assert_eq!(replica, "s1|r1");
        }
        Err(other) => panic!("expected ReplicaAlreadyExists, got {other:?}"),
        Ok(_) => panic!("expected ReplicaAlreadyExists, got a successful join"),
    }

    assert_eq!(observer.get("/g/replicas/s1|r1").await.unwrap(), before);
}

/// Concurrent constructors with distinct names both join; the group schema
/// is created exactly once and both registrations land.
#[tokio::test]
async fn concurrent_bootstrap_is_safe() {
    let store = MemoryCoordination::new();

    let (a, b) = tokio::join!(
        start_replica(&store, "/g", "s1", "r1", "host-a", test_settings()),
        start_replica(&store, "/g", "s1", "r2", "host-b", test_settings()),
    );
    let _a = a.unwrap();
    let _b = b.unwrap();

    let observer = store.session();
    let mut replicas = observer.children("/g/replicas").await.unwrap();
    replicas.sort();
    assert_eq!(replicas, vec!["s1|r1".to_string(), "s1|r2".to_string()]);

    // Two registration heartbeats were appended.
    assert_eq!(observer.get("/g/max_log_ptr").await.unwrap(), "2");
}

/// Two concurrent constructors fighting over the same name: exactly one
/// wins the registration.
#[tokio::test]
async fn concurrent_identity_race_has_one_winner() {
    let store = MemoryCoordination::new();

    let (a, b) = tokio::join!(
        open_replica(&store, "/g", "s1", "r1", "host-a", test_settings()),
        open_replica(&store, "/g", "s1", "r1", "host-b", test_settings()),
    );
    let outcomes = [a.is_ok(), b.is_ok()];
    assert_eq!(
        outcomes.iter().filter(|ok| **ok).count(),
        1,
        "exactly one constructor must win, got {outcomes:?}"
    );
}

/// Dropping replicas one by one removes the group tree with the last one.
#[tokio::test]
async fn last_replica_drop_removes_group() {
    let store = MemoryCoordination::new();
    let nodes = [
        start_replica(&store, "/g", "s1", "r1", "host-a", test_settings())
            .await
            .unwrap(),
        start_replica(&store, "/g", "s1", "r2", "host-b", test_settings())
            .await
            .unwrap(),
        start_replica(&store, "/g", "s2", "r1", "host-c", test_settings())
            .await
            .unwrap(),
    ];

    let observer = store.session();
    for (index, node) in nodes.iter().enumerate() {
        node.catalog.shutdown().await;
        node.catalog.drop_database().await.unwrap();

        let is_last = index == nodes.len() - 1;
        assert_eq!(
            observer.exists("/g").await.unwrap(),
            !is_last,
            "group tree presence after drop {index}"
        );
    }
}
