//! Cluster topology materialized from replica registrations.
//!
//! The topology is read with the same retry-until-stable pattern as the
//! metadata snapshot, fingerprinted by the replicas directory's `cversion`:
//! list children, fetch every registration in parallel, re-list, and only
//! accept the result if nothing moved.

use futures::future::join_all;

use meridian_core::{unescape_for_file_name, ReplicaId};

use crate::catalog::ReplicatedCatalog;
use crate::error::{ReplicationError, Result};
use crate::paths::DROPPED_MARK;
use crate::snapshot::retry_until_stable;

/// One reachable host of the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHost {
    /// Host name, unescaped.
    pub host: String,
    /// TCP port to connect to.
    pub port: u16,
}

/// The replicas of one shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterShard {
    /// Shard name.
    pub shard: String,
    /// Hosts carrying this shard, in replica-name order.
    pub replicas: Vec<ClusterHost>,
}

/// Runtime topology of the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopology {
    /// Shards in shard-name order.
    pub shards: Vec<ClusterShard>,
    /// User name for inter-replica connections.
    pub username: String,
    /// Password for inter-replica connections.
    pub password: String,
}

impl ReplicatedCatalog {
    /// Materializes the group's cluster topology from replica
    /// registrations. Dropped replicas are skipped.
    ///
    /// # Errors
    ///
    /// `ConnectionTriesExhausted` when registrations keep changing under the
    /// read; a logical error when the group has no replicas at all.
    pub async fn cluster(&self) -> Result<ClusterTopology> {
        let coordinator = self.coordinator();
        let replicas_dir = self.group_paths().replicas_dir();

        retry_until_stable(
            self.settings().max_topology_attempts,
            async || {
                let (mut names, before) = coordinator.children_with_stat(&replicas_dir).await?;
                if names.is_empty() {
                    return Err(ReplicationError::logical(
                        "no hosts found in replication group",
                    ));
                }
                names.sort();

                let node_paths: Vec<String> = names
                    .iter()
                    .map(|name| self.group_paths().replica(name))
                    .collect();
                let results =
                    join_all(node_paths.iter().map(|path| coordinator.try_get(path))).await;

                let mut host_ids = Vec::with_capacity(names.len());
                let mut complete = true;
                for result in results {
                    match result? {
                        Some(value) => host_ids.push(value),
                        // A replica was dropped between list and fetch.
                        None => complete = false,
                    }
                }

                let (_, after) = coordinator.children_with_stat(&replicas_dir).await?;
                if !complete || before.cversion != after.cversion {
                    tracing::debug!("replica registrations changed mid-read, retrying");
                    return Ok(None);
                }
                Ok(Some(self.build_topology(&names, &host_ids)?))
            },
            |attempts| ReplicationError::ConnectionTriesExhausted { attempts },
        )
        .await
    }

    fn build_topology(&self, names: &[String], host_ids: &[String]) -> Result<ClusterTopology> {
        let access = &self.settings().cluster;
        let port = access.port.unwrap_or(self.host_id().port);

        let mut shards: Vec<ClusterShard> = Vec::new();
        for (name, id) in names.iter().zip(host_ids) {
            if id == DROPPED_MARK {
                continue;
            }
            let replica = ReplicaId::parse_full_name(name)?;
            let host = unescape_for_file_name(id.split(':').next().unwrap_or_default());
            let entry = ClusterHost { host, port };

            match shards.last_mut() {
                Some(current) if current.shard == replica.shard() => {
                    current.replicas.push(entry);
                }
                _ => shards.push(ClusterShard {
                    shard: replica.shard().to_string(),
                    replicas: vec![entry],
                }),
            }
        }

        Ok(ClusterTopology {
            shards,
            username: access.username.clone(),
            password: access.password.clone(),
        })
    }
}
