//! Configuration for a replicated catalog.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings carried by every replica of a group.
///
/// All fields have defaults, so a configuration file only needs to name the
/// values it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// Retention horizon: how many log entries the group keeps behind
    /// `max_log_ptr`. Written into the group on first creation.
    pub logs_to_keep: u32,

    /// How long a proposing client waits for replica acknowledgements.
    /// Zero means do not wait; the entry still converges in the background.
    pub ddl_task_timeout_secs: u64,

    /// Retry cap for consistent metadata snapshots.
    pub max_snapshot_attempts: u32,

    /// Retry cap for cluster topology materialization.
    pub max_topology_attempts: u32,

    /// Retry cap for log enqueue races.
    pub max_enqueue_attempts: u32,

    /// How often the follower polls the log when no watch has fired.
    pub pull_interval_ms: u64,

    /// Credentials and port used for the materialized cluster topology.
    pub cluster: ClusterAccess,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            logs_to_keep: 1000,
            ddl_task_timeout_secs: 180,
            max_snapshot_attempts: 10,
            max_topology_attempts: 10,
            max_enqueue_attempts: 10,
            pull_interval_ms: 500,
            cluster: ClusterAccess::default(),
        }
    }
}

impl CatalogSettings {
    /// The acknowledgement wait as a [`Duration`].
    #[must_use]
    pub fn ddl_task_timeout(&self) -> Duration {
        Duration::from_secs(self.ddl_task_timeout_secs)
    }

    /// The follower poll interval as a [`Duration`].
    #[must_use]
    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.pull_interval_ms)
    }
}

/// Access parameters baked into the materialized cluster topology.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterAccess {
    /// User name for inter-replica connections.
    pub username: String,

    /// Password for inter-replica connections.
    pub password: String,

    /// TCP port to advertise for every host; defaults to the local
    /// registration port when unset.
    pub port: Option<u16>,
}

impl Default for ClusterAccess {
    fn default() -> Self {
        Self {
            username: "default".to_string(),
            password: String::new(),
            port: None,
        }
    }
}
