//! Lost-replica recovery: quarantine-and-recreate convergence.
//!
//! A replica that fell outside the retained log window (or joins with a
//! zeroed log pointer) cannot replay its way to the present. Recovery
//! reconciles it against a consistent snapshot of the authoritative catalog
//! instead:
//!
//! 1. classify local objects against the snapshot, exempting
//!    replicated-family tables whose UUIDs match (their storage-level
//!    replication reconciles divergent metadata),
//! 2. refuse to proceed if more than half of the local objects would be
//!    quarantined,
//! 3. move divergent tables into the sibling quarantine database (drop
//!    dictionaries and tables that keep nothing on disk),
//! 4. recreate every missing object from the snapshot,
//! 5. advance `log_ptr` to the snapshot's pointer.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use meridian_core::observability::replication_span;
use meridian_core::TableDefinition;

use crate::catalog::ReplicatedCatalog;
use crate::error::{ReplicationError, Result};
use crate::paths::BROKEN_TABLES_SUFFIX;
use crate::snapshot::try_consistent_metadata_snapshot;
use crate::txn::{MetadataTransaction, QueryContext};

/// Summary of one recovery run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryReport {
    /// When the recovery finished.
    pub recovered_at: DateTime<Utc>,
    /// The replica's log pointer before recovery.
    pub from_log_ptr: u32,
    /// The log pointer the replica was advanced to.
    pub to_log_ptr: u32,
    /// Tables moved into the quarantine database.
    pub moved_tables: usize,
    /// Tables dropped because they keep nothing on disk.
    pub dropped_tables: usize,
    /// Dictionaries dropped.
    pub dropped_dictionaries: usize,
    /// Objects recreated from the snapshot.
    pub recreated: usize,
}

impl ReplicatedCatalog {
    /// Reconciles this replica against a consistent snapshot of the
    /// authoritative catalog. Idempotent: a second run with no intervening
    /// log activity changes nothing.
    ///
    /// # Errors
    ///
    /// `ReplicationFailed` when no consistent snapshot can be taken or when
    /// the safety brake trips (more than half of the local objects
    /// divergent); in the latter case nothing has been touched.
    #[tracing::instrument(
        name = "replication",
        skip_all,
        fields(op = "recover", group = %self.group_paths().root(), replica = %self.replica_id().full_name())
    )]
    pub async fn recover_lost_replica(
        &self,
        our_log_ptr: u32,
        max_log_ptr: u32,
    ) -> Result<RecoveryReport> {
        self.recover_lost_replica_inner(our_log_ptr, max_log_ptr).await
    }

    async fn recover_lost_replica_inner(
        &self,
        our_log_ptr: u32,
        max_log_ptr: u32,
    ) -> Result<RecoveryReport> {
        if our_log_ptr == 0 {
            tracing::info!(max_log_ptr, "creating replica state from log pointer");
        } else {
            tracing::warn!(
                log_ptr = our_log_ptr,
                max_log_ptr,
                "recovering replica with a stale log pointer"
            );
        }

        let snapshot = try_consistent_metadata_snapshot(
            self.coordinator().as_ref(),
            self.group_paths(),
            max_log_ptr,
            self.settings().max_snapshot_attempts,
        )
        .await?;
        let max_log_ptr = snapshot.max_log_ptr;

        // Classification pass: nothing is touched yet.
        let local = self.local_store();
        let local_objects = local.list_objects().await?;
        let total = local_objects.len();
        let mut to_quarantine = Vec::new();
        for name in &local_objects {
            let local_text = local.read_definition(name).await?;
            match snapshot.tables.get(name) {
                None => to_quarantine.push(name.clone()),
                Some(expected) if *expected != local_text => {
                    if !replicated_with_same_uuid(&local_text, expected) {
                        to_quarantine.push(name.clone());
                    }
                }
                Some(_) => {}
            }
        }

        if to_quarantine.len() * 2 > total {
            return Err(ReplicationError::replication_failed(format!(
                "too many tables to recreate: {} of {}",
                to_quarantine.len(),
                total
            )));
        }

        let quarantine_db = format!("{}{BROKEN_TABLES_SUFFIX}", self.name());
        if !to_quarantine.is_empty() {
            tracing::warn!(
                count = to_quarantine.len(),
                quarantine = %quarantine_db,
                "moving divergent objects aside to recover replica"
            );
            self.registry().ensure_database(&quarantine_db);
        }

        let mut moved_tables = 0;
        let mut dropped_tables = 0;
        let mut dropped_dictionaries = 0;
        let mut dropped_uuids = Vec::new();
        for name in &to_quarantine {
            // The suffix keeps repeated recoveries from colliding.
            let to_name = format!(
                "{name}_{max_log_ptr}_{}",
                rand::thread_rng().gen_range(0..1000)
            );
            // The quarantine suffix makes the destination name sort after
            // the source database name, so this order is deadlock-free.
            let _source_guard = self.registry().ddl_guard(self.name(), name).await;
            let _dest_guard = self.registry().ddl_guard(&quarantine_db, &to_name).await;

            if local.is_dictionary(name).await? {
                tracing::debug!(dictionary = %name, "dropping quarantined dictionary");
                local.remove_dictionary(name).await?;
                dropped_dictionaries += 1;
                continue;
            }
            let Some(text) = local.try_read_definition(name).await? else {
                tracing::warn!(table = %name, "object disappeared before quarantine");
                continue;
            };
            let definition = TableDefinition::parse(&text)?;
            if definition.engine.persists_data() {
                tracing::debug!(table = %name, to = %to_name, "moving table into quarantine");
                let dest = self.registry().database(&quarantine_db)?;
                let moved = local.detach_for_move(name).await?;
                dest.attach_from_move(&to_name, &moved).await?;
                moved_tables += 1;
            } else {
                tracing::debug!(table = %name, "dropping table that keeps nothing on disk");
                if let Some(uuid) = local.object_uuid(name).await? {
                    dropped_uuids.push(uuid);
                }
                local.drop_table(name).await?;
                dropped_tables += 1;
            }
        }

        if !to_quarantine.is_empty() {
            tracing::warn!(
                total = to_quarantine.len(),
                dropped_dictionaries,
                dropped_tables,
                moved_tables,
                "cleaned outdated objects"
            );
        }

        // A later recreate may reuse a dropped table's name only after its
        // storage is fully reaped.
        for uuid in dropped_uuids {
            self.registry().wait_table_finally_dropped(uuid).await?;
        }

        let mut recreated = 0;
        for (name, text) in &snapshot.tables {
            if let Some(local_text) = local.try_read_definition(name).await? {
                debug_assert!(
                    local_text == *text || replicated_with_same_uuid(&local_text, text),
                    "kept object {name} diverges from the authoritative definition"
                );
                continue;
            }
            let definition = TableDefinition::parse(text)?.rebind(self.name(), name)?;
            let txn = MetadataTransaction::new(self.group_paths(), false);
            let ctx = QueryContext::secondary()
                .with_database(self.name())
                .with_transaction(txn.into());
            tracing::info!(table = %name, "recreating object from snapshot");
            if definition.is_dictionary() {
                self.create_dictionary(&definition, &ctx).await?;
            } else {
                self.commit_create_table(&definition, &ctx).await?;
            }
            recreated += 1;
        }

        self.coordinator()
            .set(
                &self
                    .group_paths()
                    .replica_log_ptr(&self.replica_id().full_name()),
                &max_log_ptr.to_string(),
                None,
            )
            .await?;

        let report = RecoveryReport {
            recovered_at: Utc::now(),
            from_log_ptr: our_log_ptr,
            to_log_ptr: max_log_ptr,
            moved_tables,
            dropped_tables,
            dropped_dictionaries,
            recreated,
        };
        tracing::info!(
            from = report.from_log_ptr,
            to = report.to_log_ptr,
            recreated = report.recreated,
            "replica recovered"
        );
        Ok(report)
    }
}

/// Divergent definitions are acceptable when both sides are
/// replicated-family storages for the same UUID; table-level replication
/// reconciles them.
fn replicated_with_same_uuid(local_text: &str, expected_text: &str) -> bool {
    let (Ok(local), Ok(expected)) = (
        TableDefinition::parse(local_text),
        TableDefinition::parse(expected_text),
    ) else {
        return false;
    };
    local.engine.is_replicated_family()
        && expected.engine.is_replicated_family()
        && local.uuid.is_some()
        && local.uuid == expected.uuid
}
