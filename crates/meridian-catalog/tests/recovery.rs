//! Lost-replica recovery: retention loss, divergence quarantine, safety
//! brake, and idempotence.

mod common;

use std::time::Duration;

use common::{create_replicated_table, create_table, start_replica, test_settings};

use meridian_catalog::{CatalogSettings, QueryContext, ReplicationError, BROKEN_TABLES_SUFFIX};
use meridian_coord::{Coordinator, MemoryCoordination};
use meridian_core::{DdlStatement, TableDefinition};

fn short_retention() -> CatalogSettings {
    CatalogSettings {
        logs_to_keep: 3,
        ..common::test_settings()
    }
}

/// A frozen replica misses more entries than the group retains
/// and must converge through a snapshot instead of replay.
#[tokio::test]
async fn frozen_replica_recovers_from_retention_loss() {
    let store = MemoryCoordination::new();
    let a = start_replica(&store, "/g", "s1", "r1", "host-a", short_retention())
        .await
        .unwrap();
    let b = start_replica(&store, "/g", "s1", "r2", "host-b", short_retention())
        .await
        .unwrap();

    b.catalog.stop_replication().await;

    // More activity than the retention horizon covers.
    let ctx = QueryContext::initial().with_timeout(Duration::ZERO);
    for table in ["t1", "t2", "t3", "t4", "t5", "t6"] {
        a.catalog.propose(create_table(table), &ctx).await.unwrap();
    }
    a.catalog
        .propose(
            DdlStatement::DropTable {
                database: None,
                table: "t1".into(),
            },
            &ctx,
        )
        .await
        .unwrap();
    a.catalog
        .propose(
            DdlStatement::DropTable {
                database: None,
                table: "t2".into(),
            },
            &ctx,
        )
        .await
        .unwrap();

    // Restarting replication detects the stale pointer and recovers.
    b.catalog.startup().await.unwrap();

    let observer = store.session();
    let max = observer.get("/g/max_log_ptr").await.unwrap();
    assert_eq!(
        observer.get("/g/replicas/s1|r2/log_ptr").await.unwrap(),
        max
    );

    let local = b.catalog.local_store();
    let mut objects = local.list_objects().await.unwrap();
    objects.sort();
    assert_eq!(objects, vec!["t3", "t4", "t5", "t6"]);
    for table in objects {
        assert_eq!(
            local.read_definition(&table).await.unwrap(),
            observer.get(&format!("/g/metadata/{table}")).await.unwrap()
        );
    }
}

/// A locally edited table is quarantined and the authoritative
/// copy recreated.
#[tokio::test]
async fn divergent_table_is_quarantined_and_recreated() {
    let store = MemoryCoordination::new();
    let a = start_replica(&store, "/g", "s1", "r1", "host-a", test_settings())
        .await
        .unwrap();
    let b = start_replica(&store, "/g", "s1", "r2", "host-b", test_settings())
        .await
        .unwrap();

    let ctx = QueryContext::initial().with_timeout(Duration::from_secs(10));
    for table in ["t", "u", "v"] {
        let mut stream = a
            .catalog
            .propose(create_table(table), &ctx)
            .await
            .unwrap()
            .expect("waiting enabled");
        stream.wait_all().await.unwrap();
    }

    b.catalog.stop_replication().await;

    // Corrupt B's local copy of t.
    let authoritative = b.catalog.local_store().read_definition("t").await.unwrap();
    let mut corrupted = TableDefinition::parse(&authoritative).unwrap();
    corrupted.ttl = Some("ts + INTERVAL 1 DAY".into());
    b.catalog
        .local_store()
        .commit_alter_table("t", &corrupted.to_canonical_text().unwrap())
        .await
        .unwrap();

    let observer = store.session();
    let max: u32 = observer
        .get("/g/max_log_ptr")
        .await
        .unwrap()
        .parse()
        .unwrap();
    let report = b.catalog.recover_lost_replica(0, max).await.unwrap();
    assert_eq!(report.moved_tables, 1);
    assert_eq!(report.recreated, 1);

    // The authoritative copy is back.
    let local = b.catalog.local_store();
    assert_eq!(local.read_definition("t").await.unwrap(), authoritative);

    // The divergent copy sits in the quarantine database under a
    // uniquified name.
    let quarantine = b
        .registry
        .database(&format!("analytics{BROKEN_TABLES_SUFFIX}"))
        .unwrap();
    let moved = quarantine.list_objects().await.unwrap();
    assert_eq!(moved.len(), 1);
    assert!(
        moved[0].starts_with(&format!("t_{max}_")),
        "quarantined name {:?} must embed the log pointer",
        moved[0]
    );
    assert_eq!(
        quarantine.read_definition(&moved[0]).await.unwrap(),
        corrupted.to_canonical_text().unwrap()
    );
}

/// Recovery refuses to quarantine more than half of the local tables.
#[tokio::test]
async fn safety_brake_stops_mass_quarantine() {
    let store = MemoryCoordination::new();
    let a = start_replica(&store, "/g", "s1", "r1", "host-a", test_settings())
        .await
        .unwrap();
    let b = start_replica(&store, "/g", "s1", "r2", "host-b", test_settings())
        .await
        .unwrap();

    let ctx = QueryContext::initial().with_timeout(Duration::from_secs(10));
    for table in ["t", "u"] {
        let mut stream = a
            .catalog
            .propose(create_table(table), &ctx)
            .await
            .unwrap()
            .expect("waiting enabled");
        stream.wait_all().await.unwrap();
    }

    b.catalog.stop_replication().await;
    let local = b.catalog.local_store();
    let mut before = Vec::new();
    for table in ["t", "u"] {
        let text = local.read_definition(table).await.unwrap();
        let mut corrupted = TableDefinition::parse(&text).unwrap();
        corrupted.ttl = Some("ts + INTERVAL 2 DAY".into());
        local
            .commit_alter_table(table, &corrupted.to_canonical_text().unwrap())
            .await
            .unwrap();
        before.push((table, local.read_definition(table).await.unwrap()));
    }

    let observer = store.session();
    let max: u32 = observer
        .get("/g/max_log_ptr")
        .await
        .unwrap()
        .parse()
        .unwrap();
    let result = b.catalog.recover_lost_replica(0, max).await;
    assert!(matches!(
        result,
        Err(ReplicationError::ReplicationFailed { .. })
    ));

    // No side effects: both corrupted tables are untouched.
    for (table, text) in before {
        assert_eq!(local.read_definition(table).await.unwrap(), text);
    }
    assert!(b
        .registry
        .try_database(&format!("analytics{BROKEN_TABLES_SUFFIX}"))
        .is_none());
}

/// Running recovery again with no intervening log activity is a no-op.
#[tokio::test]
async fn recovery_is_idempotent() {
    let store = MemoryCoordination::new();
    let a = start_replica(&store, "/g", "s1", "r1", "host-a", test_settings())
        .await
        .unwrap();
    let b = start_replica(&store, "/g", "s1", "r2", "host-b", test_settings())
        .await
        .unwrap();

    let ctx = QueryContext::initial().with_timeout(Duration::from_secs(10));
    let mut stream = a
        .catalog
        .propose(create_table("t"), &ctx)
        .await
        .unwrap()
        .expect("waiting enabled");
    stream.wait_all().await.unwrap();

    b.catalog.stop_replication().await;
    let observer = store.session();
    let max: u32 = observer
        .get("/g/max_log_ptr")
        .await
        .unwrap()
        .parse()
        .unwrap();

    let first = b.catalog.recover_lost_replica(0, max).await.unwrap();
    let objects_after_first = b.catalog.local_store().list_objects().await.unwrap();

    let second = b.catalog.recover_lost_replica(max, max).await.unwrap();
    assert_eq!(second.moved_tables, 0);
    assert_eq!(second.dropped_tables, 0);
    assert_eq!(second.dropped_dictionaries, 0);
    assert_eq!(second.recreated, 0);
    assert_eq!(
        b.catalog.local_store().list_objects().await.unwrap(),
        objects_after_first
    );
    assert_eq!(first.to_log_ptr, second.to_log_ptr);
}

/// Replicated-family tables with matching UUIDs survive metadata divergence;
/// table-level replication reconciles them.
#[tokio::test]
async fn replicated_tables_with_same_uuid_are_kept() {
    let store = MemoryCoordination::new();
    let a = start_replica(&store, "/g", "s1", "r1", "host-a", test_settings())
        .await
        .unwrap();
    let b = start_replica(&store, "/g", "s1", "r2", "host-b", test_settings())
        .await
        .unwrap();

    let ctx = QueryContext::initial().with_timeout(Duration::from_secs(10));
    let mut stream = a
        .catalog
        .propose(create_replicated_table("r"), &ctx)
        .await
        .unwrap()
        .expect("waiting enabled");
    stream.wait_all().await.unwrap();

    b.catalog.stop_replication().await;
    let local = b.catalog.local_store();
    let text = local.read_definition("r").await.unwrap();
    let mut diverged = TableDefinition::parse(&text).unwrap();
    diverged.ttl = Some("ts + INTERVAL 30 DAY".into());
    let diverged_text = diverged.to_canonical_text().unwrap();
    local.commit_alter_table("r", &diverged_text).await.unwrap();

    let observer = store.session();
    let max: u32 = observer
        .get("/g/max_log_ptr")
        .await
        .unwrap()
        .parse()
        .unwrap();
    let report = b.catalog.recover_lost_replica(0, max).await.unwrap();

    assert_eq!(report.moved_tables, 0);
    assert_eq!(report.recreated, 0);
    // The locally diverged definition stays; storage-level replication owns
    // the reconciliation.
    assert_eq!(local.read_definition("r").await.unwrap(), diverged_text);
}

/// A local-only dictionary is dropped during recovery, not moved.
#[tokio::test]
async fn stray_dictionary_is_dropped() {
    let store = MemoryCoordination::new();
    let a = start_replica(&store, "/g", "s1", "r1", "host-a", test_settings())
        .await
        .unwrap();
    let b = start_replica(&store, "/g", "s1", "r2", "host-b", test_settings())
        .await
        .unwrap();

    let ctx = QueryContext::initial().with_timeout(Duration::from_secs(10));
    for table in ["t", "u"] {
        let mut stream = a
            .catalog
            .propose(create_table(table), &ctx)
            .await
            .unwrap()
            .expect("waiting enabled");
        stream.wait_all().await.unwrap();
    }

    b.catalog.stop_replication().await;

    // A dictionary nobody published to the group.
    let mut stray = TableDefinition::new("lookup", meridian_core::TableEngine::Dictionary);
    stray.uuid = Some(uuid::Uuid::new_v4());
    b.catalog
        .local_store()
        .create_dictionary("lookup", &stray.to_canonical_text().unwrap())
        .await
        .unwrap();

    let observer = store.session();
    let max: u32 = observer
        .get("/g/max_log_ptr")
        .await
        .unwrap()
        .parse()
        .unwrap();
    let report = b.catalog.recover_lost_replica(0, max).await.unwrap();

    assert_eq!(report.dropped_dictionaries, 1);
    assert_eq!(report.moved_tables, 0);
    assert!(!b
        .catalog
        .local_store()
        .is_dictionary("lookup")
        .await
        .unwrap());
}
