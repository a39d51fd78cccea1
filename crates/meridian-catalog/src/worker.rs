//! The replication worker: a concrete log follower.
//!
//! One dedicated apply loop per replica pulls log entries in strictly
//! increasing suffix order, executes each as a secondary query, advances the
//! replica's `log_ptr`, and acks under the entry's `finished/` directory.
//! Client statements take the same path inline: the worker appends the entry
//! (atomic counter-allocation protocol), catches up to everything ordered
//! before it, then executes it as the initial query.
//!
//! Falling outside the retained log window triggers lost-replica recovery
//! instead of replay. A local failure leaves `log_ptr` unchanged so the
//! entry is retried on the next wake.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::Instrument;

use meridian_coord::{CoordError, Coordinator, CreateMode, Op};
use meridian_core::observability::replication_span;
use meridian_core::{DdlStatement, HostId};

use crate::catalog::ReplicatedCatalog;
use crate::config::CatalogSettings;
use crate::entry::LogEntry;
use crate::error::{ReplicationError, Result};
use crate::follower::LogFollower;
use crate::paths::GroupPaths;
use crate::snapshot::parse_ptr;
use crate::txn::{MetadataTransaction, QueryContext};

/// Allocates a log slot: creates an ephemeral-sequential counter node and
/// derives the log entry path from its suffix. The caller must commit the
/// entry and delete the counter in one multi-op, or delete the counter on
/// failure.
pub(crate) async fn allocate_entry_slot(
    coordinator: &dyn Coordinator,
    paths: &GroupPaths,
) -> Result<(u32, String, String)> {
    let counter_path = coordinator
        .create(&paths.counter_entry_prefix(), "", CreateMode::EphemeralSequential)
        .await?;
    let seq = counter_sequence(paths, &counter_path)?;
    Ok((seq, paths.log_entry(seq), counter_path))
}

fn counter_sequence(paths: &GroupPaths, counter_path: &str) -> Result<u32> {
    counter_path
        .strip_prefix(&paths.counter_entry_prefix())
        .and_then(|suffix| suffix.parse().ok())
        .ok_or_else(|| {
            ReplicationError::logical(format!("unexpected counter node path: {counter_path:?}"))
        })
}

/// The follower owned by a [`ReplicatedCatalog`]. Cheap to clone.
#[derive(Clone)]
pub struct ReplicationWorker {
    inner: Arc<WorkerInner>,
}

struct WorkerInner {
    catalog: Weak<ReplicatedCatalog>,
    coordinator: Arc<dyn Coordinator>,
    paths: GroupPaths,
    full_replica_name: String,
    host_id: HostId,
    settings: CatalogSettings,
    active: AtomicBool,
    log_ptr: AtomicU32,
    /// Serializes the apply loop with inline initiator-side execution.
    apply_lock: tokio::sync::Mutex<()>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ReplicationWorker {
    /// Creates a follower for the given replica. Holds a non-owning handle
    /// back; the replica must outlive the running loop.
    #[must_use]
    pub fn new(catalog: &Arc<ReplicatedCatalog>) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                catalog: Arc::downgrade(catalog),
                coordinator: Arc::clone(catalog.coordinator()),
                paths: catalog.group_paths().clone(),
                full_replica_name: catalog.replica_id().full_name(),
                host_id: catalog.host_id().clone(),
                settings: catalog.settings().clone(),
                active: AtomicBool::new(false),
                log_ptr: AtomicU32::new(0),
                apply_lock: tokio::sync::Mutex::new(()),
                shutdown_tx: watch::channel(false).0,
                loop_handle: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// The last applied log pointer as this worker knows it.
    #[must_use]
    pub fn log_ptr(&self) -> u32 {
        self.inner.log_ptr.load(Ordering::SeqCst)
    }
}

impl WorkerInner {
    fn catalog(&self) -> Result<Arc<ReplicatedCatalog>> {
        self.catalog
            .upgrade()
            .ok_or_else(|| ReplicationError::logical("replica is gone"))
    }

    /// The group's retention horizon; groups created by older versions may
    /// lack the node, in which case the local setting applies.
    async fn retained_window(&self) -> Result<u32> {
        match self.coordinator.try_get(&self.paths.logs_to_keep()).await? {
            Some(value) => parse_ptr(&value),
            None => Ok(self.settings.logs_to_keep),
        }
    }

    async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        tracing::debug!(replica = %self.full_replica_name, "replication follower started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // Install the watch before replaying so entries committed during
            // replay wake the loop immediately.
            let mut log_updates = match self.coordinator.watch_children(&self.paths.log_dir()).await
            {
                Ok(w) => Some(w.updates),
                // The group may be mid-drop; fall back to the poll interval.
                Err(_) => None,
            };

            if let Err(e) = self.process_pending().await {
                tracing::warn!(
                    replica = %self.full_replica_name,
                    error = %e,
                    "log replay failed; will retry"
                );
            }

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                () = async {
                    match log_updates.as_mut() {
                        Some(updates) => {
                            let _ = updates.changed().await;
                        }
                        None => std::future::pending().await,
                    }
                } => {}
                () = tokio::time::sleep(self.settings.pull_interval()) => {}
            }
        }
        tracing::debug!(replica = %self.full_replica_name, "replication follower stopped");
    }

    #[tracing::instrument(
        name = "replication",
        skip_all,
        fields(op = "replay", group = %self.paths.root(), replica = %self.full_replica_name)
    )]
    async fn process_pending(&self) -> Result<()> {
        let catalog = self.catalog()?;
        let _apply = Box::pin(self.apply_lock.lock()).await;
        self.replay_pending(&catalog, None).await
    }

    /// Replays every entry after our `log_ptr`, in suffix order, stopping
    /// before `until` when given. Switches to recovery when the replica has
    /// fallen outside the retained window.
    async fn replay_pending(
        &self,
        catalog: &Arc<ReplicatedCatalog>,
        until: Option<u32>,
    ) -> Result<()> {
        let max_log_ptr = parse_ptr(&self.coordinator.get(&self.paths.max_log_ptr()).await?)?;
        let our_ptr = self.log_ptr.load(Ordering::SeqCst);
        if our_ptr.saturating_add(self.retained_window().await?) < max_log_ptr {
            tracing::warn!(
                log_ptr = our_ptr,
                max_log_ptr,
                "replica fell outside the retained log window, recovering"
            );
            let report = catalog.recover_lost_replica(our_ptr, max_log_ptr).await?;
            self.log_ptr.store(report.to_log_ptr, Ordering::SeqCst);
            return Ok(());
        }

        let names = self.coordinator.children(&self.paths.log_dir()).await?;
        let mut pending: Vec<u32> = names
            .iter()
            .filter_map(|name| GroupPaths::parse_log_entry_name(name))
            .filter(|seq| *seq > our_ptr && until.is_none_or(|cap| *seq < cap))
            .collect();
        pending.sort_unstable();

        for seq in pending {
            self.apply_entry(catalog, seq).await?;
        }
        Ok(())
    }

    async fn apply_entry(&self, catalog: &Arc<ReplicatedCatalog>, seq: u32) -> Result<()> {
        let entry_path = self.paths.log_entry(seq);
        let Some(text) = self.coordinator.try_get(&entry_path).await? else {
            // Listed a moment ago but unreadable now; retry on the next
            // wake (retention recovery kicks in if it was trimmed).
            return Err(CoordError::no_node(entry_path).into());
        };
        let entry = LogEntry::parse(&text)?;

        if !entry.is_heartbeat() {
            let statement = DdlStatement::parse(&entry.query)?;
            let txn = Arc::new(MetadataTransaction::new(&self.paths, false));
            let ctx = QueryContext::secondary()
                .with_database(catalog.name())
                .with_transaction(txn);
            catalog.execute_statement(&statement, &ctx).await?;
        }

        self.advance_log_ptr(seq).await?;
        self.acknowledge(&entry_path, None).await;
        tracing::debug!(seq, "applied log entry");
        Ok(())
    }

    async fn advance_log_ptr(&self, seq: u32) -> Result<()> {
        self.coordinator
            .set(
                &self.paths.replica_log_ptr(&self.full_replica_name),
                &seq.to_string(),
                None,
            )
            .await?;
        self.log_ptr.store(seq, Ordering::SeqCst);
        Ok(())
    }

    async fn acknowledge(&self, entry_path: &str, error: Option<&str>) {
        let ack_path = GroupPaths::entry_ack(entry_path, &self.full_replica_name);
        let value = error.unwrap_or("0");
        match self
            .coordinator
            .create(&ack_path, value, CreateMode::Persistent)
            .await
        {
            // Re-acking after a partially applied entry is fine.
            Ok(_) | Err(CoordError::NodeExists { .. }) => {}
            Err(e) => {
                tracing::warn!(error = %e, path = %ack_path, "failed to acknowledge log entry");
            }
        }
    }

    /// Commits an entry to the log using the counter allocation, keeping
    /// `max_log_ptr` monotone with a version-guarded set.
    async fn enqueue(&self, entry: &LogEntry) -> Result<(u32, String)> {
        let wire = entry.to_wire();
        for _ in 0..self.settings.max_enqueue_attempts {
            let (seq, entry_path, counter_path) =
                allocate_entry_slot(self.coordinator.as_ref(), &self.paths).await?;

            let mut ops = vec![
                Op::create(entry_path.as_str(), wire.as_str()),
                Op::create(GroupPaths::entry_finished_dir(&entry_path), ""),
                Op::remove(counter_path.as_str()),
            ];
            let (max_value, max_stat) =
                self.coordinator.get_with_stat(&self.paths.max_log_ptr()).await?;
            if parse_ptr(&max_value)? < seq {
                ops.push(Op::Set {
                    path: self.paths.max_log_ptr(),
                    data: seq.to_string(),
                    version: Some(max_stat.version),
                });
            }

            match self.coordinator.multi(ops).await {
                Ok(_) => {
                    tracing::debug!(seq, "enqueued log entry");
                    return Ok((seq, entry_path));
                }
                Err(CoordError::BadVersion { .. }) => {
                    // Lost the max_log_ptr race; abandon the slot and retry.
                    let _ = self.coordinator.remove(&counter_path, None).await;
                }
                Err(e) => {
                    let _ = self.coordinator.remove(&counter_path, None).await;
                    return Err(e.into());
                }
            }
        }
        Err(ReplicationError::ConnectionTriesExhausted {
            attempts: self.settings.max_enqueue_attempts,
        })
    }
}

#[async_trait]
impl LogFollower for ReplicationWorker {
    fn is_currently_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    fn common_host_id(&self) -> HostId {
        self.inner.host_id.clone()
    }

    #[tracing::instrument(
        name = "replication",
        skip_all,
        fields(op = "enqueue", group = %self.inner.paths.root(), replica = %self.inner.full_replica_name)
    )]
    async fn try_enqueue_and_execute(
        &self,
        entry: LogEntry,
        ctx: &QueryContext,
    ) -> Result<String> {
        let inner = &self.inner;
        let catalog = inner.catalog()?;
        let _apply = Box::pin(inner.apply_lock.lock()).await;

        let (seq, entry_path) = inner.enqueue(&entry).await?;
        // Everything ordered before our entry applies first.
        inner.replay_pending(&catalog, Some(seq)).await?;

        let statement = DdlStatement::parse(&entry.query)?;
        let txn = Arc::new(MetadataTransaction::new(&inner.paths, true));
        let exec_ctx = ctx
            .clone()
            .with_database(catalog.name())
            .with_transaction(txn);

        match catalog.execute_statement(&statement, &exec_ctx).await {
            Ok(()) => {
                inner.advance_log_ptr(seq).await?;
                inner.acknowledge(&entry_path, None).await;
                Ok(entry_path)
            }
            Err(e) => {
                // The entry is committed to the log regardless; our
                // log_ptr stays behind so the loop retries it, and the
                // error goes to the client.
                inner.acknowledge(&entry_path, Some(&e.to_string())).await;
                Err(e)
            }
        }
    }

    async fn startup(&self) -> Result<()> {
        let inner = &self.inner;
        let catalog = inner.catalog()?;

        let stored = parse_ptr(
            &inner
                .coordinator
                .get(&inner.paths.replica_log_ptr(&inner.full_replica_name))
                .await?,
        )?;
        inner.log_ptr.store(stored, Ordering::SeqCst);

        let max_log_ptr = parse_ptr(&inner.coordinator.get(&inner.paths.max_log_ptr()).await?)?;
        if stored == 0 || stored.saturating_add(inner.retained_window().await?) < max_log_ptr {
            let report = catalog.recover_lost_replica(stored, max_log_ptr).await?;
            inner.log_ptr.store(report.to_log_ptr, Ordering::SeqCst);
        }

        inner.active.store(true, Ordering::SeqCst);
        let loop_inner = Arc::clone(inner);
        let shutdown_rx = inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(loop_inner.run(shutdown_rx));
        *inner.loop_handle.lock().await = Some(handle);
        Ok(())
    }

    async fn shutdown(&self) {
        self.inner.active.store(false, Ordering::SeqCst);
        let _ = self.inner.shutdown_tx.send(true);
        if let Some(handle) = self.inner.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}
