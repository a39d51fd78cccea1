//! # meridian-catalog
//!
//! Replicated schema management for a distributed analytic database. A set
//! of replicas sharing a coordination-store root (a *replication group*)
//! applies every schema-modifying statement in one global order and
//! converges even after a replica falls behind, dies, or joins empty.
//!
//! ## Coordination layout
//!
//! ```text
//! {root}/
//! ├── log/query-{ptr:010}/finished/{replica}   # ordered statements + acks
//! ├── replicas/{shard|replica}/log_ptr         # membership + progress
//! ├── counter/cnt-                             # monotone suffix allocator
//! ├── metadata/{escaped table}                 # canonical definitions
//! ├── max_log_ptr
//! └── logs_to_keep
//! ```
//!
//! ## Pieces
//!
//! - [`ReplicatedCatalog`]: one replica. Construction bootstraps the group
//!   and registers membership; [`ReplicatedCatalog::propose`] appends a
//!   statement to the log; the handler set keeps the authoritative catalog
//!   and the local [`SchemaStore`] in agreement through
//!   [`MetadataTransaction`]s.
//! - [`ReplicationWorker`]: the [`LogFollower`] that replays entries in
//!   order, acks them, and advances the replica's log pointer.
//! - [`MetadataSnapshot`] and lost-replica recovery: consistent reads of the
//!   authoritative catalog and the quarantine-and-recreate procedure.
//! - [`ClusterTopology`]: runtime cluster view materialized from replica
//!   registrations.
//!
//! ## Example
//!
//! ```rust,ignore
//! let registry = CatalogRegistry::in_memory();
//! let catalog = ReplicatedCatalog::open(options, coordinator, registry, settings).await?;
//! catalog.startup().await?;
//!
//! let mut stream = catalog
//!     .propose(statement, &QueryContext::initial())
//!     .await?
//!     .expect("waiting enabled");
//! while let Some(status) = stream.next().await? {
//!     println!("{}: {:?}", status.host, status.error);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod catalog;
pub mod cluster;
pub mod config;
pub mod entry;
pub mod error;
pub mod follower;
pub mod local;
pub mod paths;
pub mod recovery;
pub mod snapshot;
pub mod status;
pub mod txn;
pub mod worker;

pub use catalog::{ReplicaOptions, ReplicatedCatalog};
pub use cluster::{ClusterHost, ClusterShard, ClusterTopology};
pub use config::{CatalogSettings, ClusterAccess};
pub use entry::LogEntry;
pub use error::{ReplicationError, Result};
pub use follower::LogFollower;
pub use local::{CatalogRegistry, DdlGuard, MemorySchemaStore, SchemaStore};
pub use paths::{GroupPaths, BROKEN_TABLES_SUFFIX, DROPPED_MARK};
pub use recovery::RecoveryReport;
pub use snapshot::{try_consistent_metadata_snapshot, MetadataSnapshot};
pub use status::{DdlStatusStream, HostStatus};
pub use txn::{MetadataTransaction, QueryContext, QueryKind};
pub use worker::ReplicationWorker;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::catalog::{ReplicaOptions, ReplicatedCatalog};
    pub use crate::config::CatalogSettings;
    pub use crate::error::{ReplicationError, Result};
    pub use crate::local::{CatalogRegistry, SchemaStore};
    pub use crate::txn::QueryContext;
    pub use meridian_core::prelude::*;
}
