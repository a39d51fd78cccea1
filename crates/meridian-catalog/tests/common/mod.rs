//! Shared fixture: replicas of one group over a single in-memory
//! coordination store, each node with its own session and catalog registry.

// Each test binary uses a different subset of the fixture.
#![allow(dead_code)]

use std::sync::Arc;

use uuid::Uuid;

use meridian_catalog::{
    CatalogRegistry, CatalogSettings, ReplicaOptions, ReplicatedCatalog, Result,
};
use meridian_coord::{Coordinator, MemoryCoordination};
use meridian_core::{
    ColumnDefinition, DdlStatement, GroupPath, ReplicaId, TableDefinition, TableEngine,
};

/// One simulated node hosting one replica.
pub struct Node {
    pub catalog: Arc<ReplicatedCatalog>,
    pub registry: Arc<CatalogRegistry>,
}

/// Routes replication logs through `RUST_LOG` so a failing test can be
/// rerun verbosely. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Settings tuned for tests: quick polling, short ack waits.
pub fn test_settings() -> CatalogSettings {
    CatalogSettings {
        ddl_task_timeout_secs: 10,
        pull_interval_ms: 50,
        ..CatalogSettings::default()
    }
}

/// Opens a replica and starts its follower.
pub async fn start_replica(
    store: &MemoryCoordination,
    group: &str,
    shard: &str,
    replica: &str,
    host: &str,
    settings: CatalogSettings,
) -> Result<Node> {
    let node = open_replica(store, group, shard, replica, host, settings).await?;
    node.catalog.startup().await?;
    Ok(node)
}

/// Opens a replica without starting replication.
pub async fn open_replica(
    store: &MemoryCoordination,
    group: &str,
    shard: &str,
    replica: &str,
    host: &str,
    settings: CatalogSettings,
) -> Result<Node> {
    init_tracing();
    let registry = CatalogRegistry::in_memory();
    let options = ReplicaOptions {
        database: "analytics".to_string(),
        database_uuid: Uuid::new_v4(),
        group: GroupPath::new(group)?,
        replica: ReplicaId::new(shard, replica)?,
        host: host.to_string(),
        port: 9000,
    };
    let session: Arc<dyn Coordinator> = Arc::new(store.session());
    let catalog =
        ReplicatedCatalog::open(options, session, Arc::clone(&registry), settings).await?;
    Ok(Node { catalog, registry })
}

/// A CREATE TABLE statement with a small deterministic schema.
pub fn create_table(table: &str) -> DdlStatement {
    let mut definition = TableDefinition::new(table, TableEngine::MergeTree);
    definition.columns.push(ColumnDefinition::new("id", "UInt64"));
    definition.columns.push(ColumnDefinition::new("ts", "DateTime"));
    definition.order_by = vec!["id".to_string()];
    DdlStatement::CreateTable { definition }
}

/// A CREATE TABLE statement backed by table-level replication.
pub fn create_replicated_table(table: &str) -> DdlStatement {
    let mut definition = TableDefinition::new(
        table,
        TableEngine::ReplicatedMergeTree {
            path: format!("/tables/{table}"),
            replica: "{replica}".to_string(),
        },
    );
    definition.columns.push(ColumnDefinition::new("id", "UInt64"));
    definition.order_by = vec!["id".to_string()];
    DdlStatement::CreateTable { definition }
}
