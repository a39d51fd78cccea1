//! Consistent snapshots of the group's authoritative metadata.
//!
//! A snapshot is only returned if `max_log_ptr` did not move while the
//! metadata children were being fetched and no fetch raced a deletion;
//! otherwise the read retries, up to a cap.

use std::collections::BTreeMap;

use futures::future::join_all;

use meridian_coord::Coordinator;
use meridian_core::unescape_for_file_name;

use crate::error::{ReplicationError, Result};
use crate::paths::GroupPaths;

/// The authoritative catalog at one point in the log order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataSnapshot {
    /// The log pointer this snapshot corresponds to.
    pub max_log_ptr: u32,
    /// Unescaped table name to canonical definition text.
    pub tables: BTreeMap<String, String>,
}

/// Retries `attempt` until it reports a stable result (`Some`), up to
/// `max_attempts`. An attempt returning `None` observed a moving fingerprint
/// and is retried; errors abort immediately.
pub(crate) async fn retry_until_stable<T, F>(
    max_attempts: u32,
    mut attempt: F,
    on_exhausted: impl FnOnce(u32) -> ReplicationError,
) -> Result<T>
where
    F: AsyncFnMut() -> Result<Option<T>>,
{
    for _ in 0..max_attempts {
        if let Some(value) = attempt().await? {
            return Ok(value);
        }
    }
    Err(on_exhausted(max_attempts))
}

/// Parses a stored log pointer value.
pub(crate) fn parse_ptr(text: &str) -> Result<u32> {
    text.trim().parse().map_err(|_| {
        ReplicationError::logical(format!("malformed log pointer value: {text:?}"))
    })
}

/// Takes a consistent snapshot of `{root}/metadata` (§ layout in
/// [`GroupPaths`]) starting from a `max_log_ptr` guess.
///
/// # Errors
///
/// Returns `ReplicationFailed` when no stable snapshot could be taken within
/// `max_attempts`; store errors pass through.
pub async fn try_consistent_metadata_snapshot(
    coordinator: &dyn Coordinator,
    paths: &GroupPaths,
    starting_max_log_ptr: u32,
    max_attempts: u32,
) -> Result<MetadataSnapshot> {
    let mut max_log_ptr = starting_max_log_ptr;
    retry_until_stable(
        max_attempts,
        async || {
            tracing::debug!(max_log_ptr, "taking metadata snapshot");
            let names = coordinator.children(&paths.metadata_dir()).await?;
            let node_paths: Vec<String> =
                names.iter().map(|name| paths.metadata_child(name)).collect();
            let results = join_all(node_paths.iter().map(|path| coordinator.try_get(path))).await;

            let mut tables = BTreeMap::new();
            let mut complete = true;
            for (name, result) in names.iter().zip(results) {
                match result? {
                    Some(text) => {
                        tables.insert(unescape_for_file_name(name), text);
                    }
                    // The node was deleted between list and fetch.
                    None => complete = false,
                }
            }

            let new_max = parse_ptr(&coordinator.get(&paths.max_log_ptr()).await?)?;
            if new_max == max_log_ptr && complete {
                tracing::debug!(max_log_ptr, tables = tables.len(), "metadata snapshot is stable");
                return Ok(Some(MetadataSnapshot {
                    max_log_ptr,
                    tables,
                }));
            }

            if max_log_ptr < new_max {
                tracing::debug!(from = max_log_ptr, to = new_max, "log pointer moved, retrying");
                max_log_ptr = new_max;
            } else {
                tracing::debug!("metadata fetch raced a deletion, retrying");
            }
            Ok(None)
        },
        |attempts| {
            ReplicationError::replication_failed(format!(
                "cannot get a consistent metadata snapshot after {attempts} attempts"
            ))
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_coord::{CreateMode, MemoryCoordination, MemorySession};
    use meridian_core::GroupPath;

    async fn seed_group(session: &MemorySession) -> GroupPaths {
        let paths = GroupPaths::new(&GroupPath::new("/g").unwrap());
        session.create("/g", "", CreateMode::Persistent).await.unwrap();
        session
            .create(&paths.metadata_dir(), "", CreateMode::Persistent)
            .await
            .unwrap();
        session
            .create(&paths.max_log_ptr(), "3", CreateMode::Persistent)
            .await
            .unwrap();
        paths
    }

    #[tokio::test]
    async fn snapshot_returns_all_tables() {
        let store = MemoryCoordination::new();
        let session = store.session();
        let paths = seed_group(&session).await;
        session
            .create(&paths.table_metadata("t1"), "def1", CreateMode::Persistent)
            .await
            .unwrap();
        session
            .create(&paths.table_metadata("weird name"), "def2", CreateMode::Persistent)
            .await
            .unwrap();

        let snapshot = try_consistent_metadata_snapshot(&session, &paths, 3, 10)
            .await
            .unwrap();
        assert_eq!(snapshot.max_log_ptr, 3);
        assert_eq!(snapshot.tables.len(), 2);
        assert_eq!(snapshot.tables["t1"], "def1");
        // Keys come back unescaped.
        assert_eq!(snapshot.tables["weird name"], "def2");
    }

    #[tokio::test]
    async fn snapshot_follows_an_advancing_log_pointer() {
        let store = MemoryCoordination::new();
        let session = store.session();
        let paths = seed_group(&session).await;

        // Caller's guess is stale; the snapshot must adopt the stored value.
        let snapshot = try_consistent_metadata_snapshot(&session, &paths, 1, 10)
            .await
            .unwrap();
        assert_eq!(snapshot.max_log_ptr, 3);
    }

    #[tokio::test]
    async fn retry_cap_produces_replication_failed() {
        let store = MemoryCoordination::new();
        let session = store.session();
        let paths = seed_group(&session).await;

        // A guess above the stored value never stabilizes: the stored value
        // stays 3 while the caller insists on 5.
        let result = try_consistent_metadata_snapshot(&session, &paths, 5, 3).await;
        assert!(matches!(
            result,
            Err(ReplicationError::ReplicationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn retry_until_stable_counts_attempts() {
        let mut calls = 0_u32;
        let result: Result<u32> = retry_until_stable(
            3,
            async || {
                calls += 1;
                Ok(None)
            },
            |attempts| ReplicationError::ConnectionTriesExhausted { attempts },
        )
        .await;
        assert_eq!(calls, 3);
        assert!(matches!(
            result,
            Err(ReplicationError::ConnectionTriesExhausted { attempts: 3 })
        ));
    }
}
