//! Canonical coordination-store paths for a replication group.
//!
//! This module is the single source of truth for the group's node layout.
//! No hardcoded path strings should exist outside it.
//!
//! # Layout
//!
//! ```text
//! {root}/
//! ├── log/
//! │   └── query-{ptr:010}          # one entry per replicated statement
//! │       └── finished/
//! │           └── {shard|replica}  # per-replica ack: "0" or an error text
//! ├── replicas/
//! │   └── {shard|replica}          # value: host id, or DROPPED tombstone
//! │       └── log_ptr              # last entry this replica applied
//! ├── counter/
//! │   └── cnt-                     # ephemeral-sequential suffix allocator
//! ├── metadata/
//! │   └── {escaped table name}     # canonical definition text
//! ├── max_log_ptr                  # suffix of the newest committed entry
//! └── logs_to_keep                 # retention horizon
//! ```

use meridian_core::{escape_for_file_name, GroupPath};

/// Tombstone value written into a replica node when it is dropped.
pub const DROPPED_MARK: &str = "DROPPED";

/// Suffix of the sibling database that receives quarantined tables.
pub const BROKEN_TABLES_SUFFIX: &str = "_broken_tables";

/// Prefix of log entry node names.
pub const LOG_ENTRY_PREFIX: &str = "query-";

/// Prefix of counter allocation node names.
pub const COUNTER_PREFIX: &str = "cnt-";

/// Canonical path generator for one replication group.
#[derive(Debug, Clone)]
pub struct GroupPaths {
    root: String,
}

impl GroupPaths {
    /// Creates the path generator for a group root.
    #[must_use]
    pub fn new(group: &GroupPath) -> Self {
        Self {
            root: group.as_str().to_string(),
        }
    }

    /// The group root.
    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// The log directory.
    #[must_use]
    pub fn log_dir(&self) -> String {
        format!("{}/log", self.root)
    }

    /// The log entry node for a pointer value.
    #[must_use]
    pub fn log_entry(&self, ptr: u32) -> String {
        format!("{}/log/{}", self.root, Self::log_entry_name(ptr))
    }

    /// The node name of a log entry, `query-` plus the zero-padded pointer.
    #[must_use]
    pub fn log_entry_name(ptr: u32) -> String {
        format!("{LOG_ENTRY_PREFIX}{ptr:010}")
    }

    /// Extracts the pointer value from a log entry node name.
    #[must_use]
    pub fn parse_log_entry_name(name: &str) -> Option<u32> {
        name.strip_prefix(LOG_ENTRY_PREFIX)?.parse().ok()
    }

    /// The ack directory under a log entry node.
    #[must_use]
    pub fn entry_finished_dir(entry_path: &str) -> String {
        format!("{entry_path}/finished")
    }

    /// One replica's ack node under a log entry.
    #[must_use]
    pub fn entry_ack(entry_path: &str, full_replica_name: &str) -> String {
        format!("{entry_path}/finished/{full_replica_name}")
    }

    /// The replicas directory.
    #[must_use]
    pub fn replicas_dir(&self) -> String {
        format!("{}/replicas", self.root)
    }

    /// One replica's registration node.
    #[must_use]
    pub fn replica(&self, full_replica_name: &str) -> String {
        format!("{}/replicas/{full_replica_name}", self.root)
    }

    /// One replica's log pointer node.
    #[must_use]
    pub fn replica_log_ptr(&self, full_replica_name: &str) -> String {
        format!("{}/replicas/{full_replica_name}/log_ptr", self.root)
    }

    /// The counter directory.
    #[must_use]
    pub fn counter_dir(&self) -> String {
        format!("{}/counter", self.root)
    }

    /// The prefix for counter allocations; the store appends the sequence
    /// suffix.
    #[must_use]
    pub fn counter_entry_prefix(&self) -> String {
        format!("{}/counter/{COUNTER_PREFIX}", self.root)
    }

    /// The metadata directory.
    #[must_use]
    pub fn metadata_dir(&self) -> String {
        format!("{}/metadata", self.root)
    }

    /// The metadata node for a table, escaping the name.
    #[must_use]
    pub fn table_metadata(&self, table_name: &str) -> String {
        format!("{}/metadata/{}", self.root, escape_for_file_name(table_name))
    }

    /// The metadata node for an already-escaped child name.
    #[must_use]
    pub fn metadata_child(&self, escaped_name: &str) -> String {
        format!("{}/metadata/{escaped_name}", self.root)
    }

    /// The `max_log_ptr` node.
    #[must_use]
    pub fn max_log_ptr(&self) -> String {
        format!("{}/max_log_ptr", self.root)
    }

    /// The `logs_to_keep` node.
    #[must_use]
    pub fn logs_to_keep(&self) -> String {
        format!("{}/logs_to_keep", self.root)
    }
}
