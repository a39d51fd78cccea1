//! Streaming status of a proposed statement across the group.
//!
//! Every replica acknowledges an executed entry by creating a child under
//! the entry's `finished/` directory. The stream watches that directory and
//! yields one [`HostStatus`] per expected replica. Timing out only abandons
//! the wait: the entry is committed to the log and will still converge.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use meridian_coord::Coordinator;

use crate::error::{ReplicationError, Result};
use crate::paths::GroupPaths;

/// One replica's execution outcome for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostStatus {
    /// Full replica name that acknowledged.
    pub host: String,
    /// `None` on success, otherwise the error text the replica recorded.
    pub error: Option<String>,
}

impl HostStatus {
    /// Whether the replica executed the entry successfully.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Streams per-replica acknowledgements of one log entry.
pub struct DdlStatusStream {
    coordinator: Arc<dyn Coordinator>,
    finished_dir: String,
    waiting: BTreeSet<String>,
    deadline: tokio::time::Instant,
}

impl std::fmt::Debug for DdlStatusStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdlStatusStream")
            .field("finished_dir", &self.finished_dir)
            .field("waiting", &self.waiting)
            .finish_non_exhaustive()
    }
}

impl DdlStatusStream {
    pub(crate) fn new(
        coordinator: Arc<dyn Coordinator>,
        entry_path: &str,
        hosts_to_wait: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            coordinator,
            finished_dir: GroupPaths::entry_finished_dir(entry_path),
            waiting: hosts_to_wait.into_iter().collect(),
            deadline: tokio::time::Instant::now() + timeout,
        }
    }

    /// Replicas that have not acknowledged yet.
    pub fn waiting(&self) -> impl Iterator<Item = &str> {
        self.waiting.iter().map(String::as_str)
    }

    /// Waits for the next acknowledgement. Returns `None` once every
    /// expected replica has acknowledged.
    ///
    /// # Errors
    ///
    /// `StatusWaitTimeout` when the deadline passes with replicas still
    /// pending; store errors pass through.
    pub async fn next(&mut self) -> Result<Option<HostStatus>> {
        while !self.waiting.is_empty() {
            let watch = self.coordinator.watch_children(&self.finished_dir).await?;
            if let Some(done) = watch
                .children
                .iter()
                .find(|name| self.waiting.contains(*name))
            {
                let host = done.clone();
                self.waiting.remove(&host);
                let ack_path = format!("{}/{host}", self.finished_dir);
                let value = self.coordinator.get(&ack_path).await?;
                let error = (value != "0").then_some(value);
                return Ok(Some(HostStatus { host, error }));
            }

            let mut updates = watch.updates;
            tokio::select! {
                changed = updates.changed() => {
                    changed.map_err(|_| {
                        ReplicationError::Coordination(meridian_coord::CoordError::unavailable(
                            "status watch closed",
                        ))
                    })?;
                }
                () = tokio::time::sleep_until(self.deadline) => {
                    return Err(ReplicationError::StatusWaitTimeout {
                        unfinished: self.waiting.iter().cloned().collect(),
                    });
                }
            }
        }
        Ok(None)
    }

    /// Drains the stream, returning every replica's outcome.
    ///
    /// # Errors
    ///
    /// Same as [`Self::next`].
    pub async fn wait_all(&mut self) -> Result<Vec<HostStatus>> {
        let mut statuses = Vec::new();
        while let Some(status) = self.next().await? {
            statuses.push(status);
        }
        Ok(statuses)
    }
}
