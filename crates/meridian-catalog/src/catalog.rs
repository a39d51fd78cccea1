//! The replicated catalog: one replica's view of a replication group.
//!
//! A [`ReplicatedCatalog`] ties together the coordination store, the local
//! schema store, and the log follower. Construction validates the replica's
//! coordinates, bootstraps the group schema on first contact, and registers
//! the replica; [`ReplicatedCatalog::startup`] then brings up the follower.
//!
//! Statement flow: [`ReplicatedCatalog::propose`] appends a client statement
//! to the group log and executes it locally as the *initial query*, inside a
//! metadata transaction whose coordination-store ops commit atomically
//! before the local catalog mutation. Every other replica replays the entry
//! as a *secondary query* through the same handler set, with an empty
//! transaction.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

use tracing::Instrument;

use meridian_coord::{CoordError, Coordinator, CreateMode, Op};
use meridian_core::observability::replication_span;
use meridian_core::{DdlStatement, GroupPath, HostId, ReplicaId, TableDefinition};

use crate::config::CatalogSettings;
use crate::entry::LogEntry;
use crate::error::{ReplicationError, Result};
use crate::follower::LogFollower;
use crate::local::{CatalogRegistry, SchemaStore};
use crate::paths::GroupPaths;
use crate::snapshot::parse_ptr;
use crate::status::DdlStatusStream;
use crate::txn::QueryContext;
use crate::worker::{allocate_entry_slot, ReplicationWorker};

/// Everything needed to construct a replica.
#[derive(Debug, Clone)]
pub struct ReplicaOptions {
    /// Local database name the replica is bound to.
    pub database: String,
    /// UUID of the local database; part of the host identity.
    pub database_uuid: Uuid,
    /// Coordination-store root shared by the group.
    pub group: GroupPath,
    /// This replica's coordinates inside the group.
    pub replica: ReplicaId,
    /// Host name announced to the group.
    pub host: String,
    /// TCP port announced to the group.
    pub port: u16,
}

/// One replica of a replicated schema group.
pub struct ReplicatedCatalog {
    name: String,
    replica: ReplicaId,
    host_id: HostId,
    paths: GroupPaths,
    replica_path: String,
    settings: CatalogSettings,
    coordinator: Arc<dyn Coordinator>,
    local: Arc<dyn SchemaStore>,
    registry: Arc<CatalogRegistry>,
    follower: RwLock<Option<Arc<dyn LogFollower>>>,
}

impl std::fmt::Debug for ReplicatedCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedCatalog")
            .field("name", &self.name)
            .field("replica", &self.replica.full_name())
            .field("group", &self.paths.root())
            .finish_non_exhaustive()
    }
}

impl ReplicatedCatalog {
    /// Opens a replica: validates names, bootstraps the group schema if this
    /// is the first contact, and registers the replica.
    ///
    /// # Errors
    ///
    /// `ReplicaAlreadyExists` when another host holds the same
    /// `shard|replica` name; coordination-store errors pass through.
    pub async fn open(
        options: ReplicaOptions,
        coordinator: Arc<dyn Coordinator>,
        registry: Arc<CatalogRegistry>,
        settings: CatalogSettings,
    ) -> Result<Arc<Self>> {
        let paths = GroupPaths::new(&options.group);
        let host_id = HostId::new(options.host, options.port, options.database_uuid);
        let local = registry.ensure_database(&options.database);
        let replica_path = paths.replica(&options.replica.full_name());

        let catalog = Self {
            name: options.database,
            replica: options.replica,
            host_id,
            paths,
            replica_path,
            settings,
            coordinator,
            local,
            registry,
            follower: RwLock::new(None),
        };

        if !catalog.coordinator.exists(catalog.paths.root()).await? {
            catalog.create_group_nodes().await?;
        }

        match catalog.coordinator.try_get(&catalog.replica_path).await? {
            Some(stored) => {
                let current = catalog.host_id.to_string();
                if stored != current {
                    return Err(ReplicationError::ReplicaAlreadyExists {
                        replica: catalog.replica.full_name(),
                        group: catalog.paths.root().to_string(),
                        stored,
                        current,
                    });
                }
            }
            None => catalog.register_replica().await?,
        }

        Ok(Arc::new(catalog))
    }

    /// Starts replication: creates the follower and runs its startup
    /// convergence.
    ///
    /// # Errors
    ///
    /// Propagates follower startup failures (initial recovery).
    pub async fn startup(self: &Arc<Self>) -> Result<()> {
        let worker: Arc<dyn LogFollower> = Arc::new(ReplicationWorker::new(self));
        *self.follower.write().expect("follower lock poisoned") = Some(Arc::clone(&worker));
        worker.startup().await
    }

    /// Creates the group schema with a single atomic multi-op. Returns
    /// whether this node created it; a concurrent creator is a benign race.
    async fn create_group_nodes(&self) -> Result<bool> {
        self.coordinator.create_ancestors(self.paths.root()).await?;

        // The throwaway counter child primes the sequence numbering so the
        // first allocated suffix is 1.
        let ops = vec![
            Op::create(self.paths.root(), ""),
            Op::create(self.paths.log_dir(), ""),
            Op::create(self.paths.replicas_dir(), ""),
            Op::create(self.paths.counter_dir(), ""),
            Op::create(self.paths.counter_entry_prefix(), ""),
            Op::remove(self.paths.counter_entry_prefix()),
            Op::create(self.paths.metadata_dir(), ""),
            Op::create(self.paths.max_log_ptr(), "1"),
            Op::create(self.paths.logs_to_keep(), self.settings.logs_to_keep.to_string()),
        ];

        match self.coordinator.multi(ops).await {
            Ok(_) => {
                tracing::info!(group = self.paths.root(), "created replication group schema");
                Ok(true)
            }
            Err(CoordError::NodeExists { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Registers this replica and simultaneously appends an empty heartbeat
    /// entry to the log, all in one multi-op.
    async fn register_replica(&self) -> Result<()> {
        let full_name = self.replica.full_name();
        let heartbeat = LogEntry::heartbeat().to_wire();

        for _ in 0..self.settings.max_enqueue_attempts {
            let (seq, entry_path, counter_path) =
                allocate_entry_slot(self.coordinator.as_ref(), &self.paths).await?;

            let mut ops = vec![
                Op::create(self.replica_path.as_str(), self.host_id.to_string()),
                Op::create(self.paths.replica_log_ptr(&full_name), "0"),
                Op::create(entry_path.as_str(), heartbeat.as_str()),
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
                    tracing::info!(
                        replica = %full_name,
                        group = self.paths.root(),
                        "registered replica"
                    );
                    return Ok(());
                }
                Err(CoordError::NodeExists { path }) if path == self.replica_path => {
                    // Lost a registration race for the same name.
                    let _ = self.coordinator.remove(&counter_path, None).await;
                    let stored = self
                        .coordinator
                        .try_get(&self.replica_path)
                        .await?
                        .unwrap_or_default();
                    return Err(ReplicationError::ReplicaAlreadyExists {
                        replica: full_name,
                        group: self.paths.root().to_string(),
                        stored,
                        current: self.host_id.to_string(),
                    });
                }
                Err(CoordError::BadVersion { .. }) => {
                    // Lost the max_log_ptr race; retry with a fresh slot.
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

    /// Appends a statement to the group log, executes it locally, and
    /// returns a status stream over the registered replicas' acks, or
    /// `None` when the effective acknowledgement wait is zero.
    ///
    /// # Errors
    ///
    /// `IncorrectQuery` for non-initial contexts; `NotImplemented` for ALTER
    /// commands outside the schema subset and cross-database renames; local
    /// execution failures propagate (the entry stays committed to the log).
    #[tracing::instrument(
        name = "replication",
        skip_all,
        fields(op = "propose", group = %self.paths.root(), replica = %self.replica.full_name())
    )]
    pub async fn propose(
        &self,
        mut statement: DdlStatement,
        ctx: &QueryContext,
    ) -> Result<Option<DdlStatusStream>> {
        if !ctx.is_initial_query() {
            return Err(ReplicationError::incorrect_query(
                "it is not an initial query; ON CLUSTER is not allowed for a replicated \
                 database",
            ));
        }
        self.validate_statement(&statement)?;

        // Assign identity before the statement is logged, so every
        // replica creates the object under the same UUID.
        if let DdlStatement::CreateTable { definition }
        | DdlStatement::CreateDictionary { definition } = &mut statement
        {
            if definition.uuid.is_none() {
                definition.uuid = Some(Uuid::new_v4());
            }
        }

        tracing::debug!(statement = %statement, "proposing");
        statement.strip_database();
        let entry = LogEntry::new(statement.to_wire()?, self.host_id.to_string());

        let follower = self.follower().ok_or_else(|| {
            ReplicationError::logical("replication has not been started on this replica")
        })?;
        let entry_path = follower.try_enqueue_and_execute(entry, ctx).await?;

        let timeout = ctx
            .ddl_task_timeout()
            .unwrap_or_else(|| self.settings.ddl_task_timeout());
        if timeout.is_zero() {
            return Ok(None);
        }
        let hosts = self.coordinator.children(&self.paths.replicas_dir()).await?;
        Ok(Some(DdlStatusStream::new(
            Arc::clone(&self.coordinator),
            &entry_path,
            hosts,
            timeout,
        )))
    }

    fn validate_statement(&self, statement: &DdlStatement) -> Result<()> {
        if let Some(database) = statement_database(statement) {
            if database != self.name {
                return Err(ReplicationError::bad_arguments(format!(
                    "statement addressed to database {database:?}, not {:?}",
                    self.name
                )));
            }
        }
        match statement {
            DdlStatement::AlterTable { commands, .. } => {
                if let Some(bad) = commands.iter().find(|c| !c.is_schema_alteration()) {
                    return Err(ReplicationError::not_implemented(format!(
                        "unsupported kind of ALTER query: {}",
                        bad.describe()
                    )));
                }
            }
            DdlStatement::RenameTable { to_database, .. } => {
                if to_database.as_deref().is_some_and(|db| db != self.name) {
                    return Err(ReplicationError::not_implemented(
                        "moving tables between databases is not supported for a replicated \
                         database",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Applies one statement to this replica through the handler set,
    /// holding the affected DDL guards.
    ///
    /// # Errors
    ///
    /// Propagates handler failures.
    pub async fn execute_statement(
        &self,
        statement: &DdlStatement,
        ctx: &QueryContext,
    ) -> Result<()> {
        match statement {
            DdlStatement::CreateTable { definition } => {
                let _guard = self.registry.ddl_guard(&self.name, &definition.table).await;
                self.commit_create_table(definition, ctx).await
            }
            DdlStatement::CreateDictionary { definition } => {
                let _guard = self.registry.ddl_guard(&self.name, &definition.table).await;
                self.create_dictionary(definition, ctx).await
            }
            DdlStatement::DropTable { table, .. } => {
                let _guard = self.registry.ddl_guard(&self.name, table).await;
                self.drop_table(table, ctx).await
            }
            DdlStatement::DropDictionary { name, .. } => {
                let _guard = self.registry.ddl_guard(&self.name, name).await;
                self.remove_dictionary(name, ctx).await
            }
            DdlStatement::DetachTablePermanently { table, .. } => {
                let _guard = self.registry.ddl_guard(&self.name, table).await;
                self.detach_table_permanently(table, ctx).await
            }
            DdlStatement::AlterTable {
                table, commands, ..
            } => {
                let _guard = self.registry.ddl_guard(&self.name, table).await;
                let text = self.local.read_definition(table).await?;
                let mut definition = TableDefinition::parse(&text)?;
                for command in commands {
                    definition.apply(command)?;
                }
                self.commit_alter_table(table, &definition, ctx).await
            }
            DdlStatement::RenameTable {
                from, to, exchange, ..
            } => {
                if from == to {
                    return Err(ReplicationError::incorrect_query(
                        "cannot rename table to itself",
                    ));
                }
                // Guard order follows name order to keep lock acquisition
                // deadlock-free.
                let (first, second) = if from < to { (from, to) } else { (to, from) };
                let _first = self.registry.ddl_guard(&self.name, first).await;
                let _second = self.registry.ddl_guard(&self.name, second).await;
                self.rename_table(from, to, *exchange, ctx).await
            }
        }
    }

    // ========================================================================
    // Handler set: coordination op + local mutation per DDL kind
    // ========================================================================

    /// Creates a table: publishes the canonical definition (the create op
    /// fails if the name is already taken inside the group), then commits
    /// locally.
    ///
    /// # Errors
    ///
    /// Duplicate names fail the metadata commit; local failures pass
    /// through.
    pub async fn commit_create_table(
        &self,
        definition: &TableDefinition,
        ctx: &QueryContext,
    ) -> Result<()> {
        debug_assert!(!self.is_replication_active() || ctx.transaction().is_some());
        let text = definition.canonical_for_group()?.to_canonical_text()?;
        self.add_initial_op(ctx, Op::Create {
            path: self.paths.table_metadata(&definition.table),
            data: text.clone(),
            mode: CreateMode::Persistent,
        });
        self.commit_metadata(ctx).await?;
        self.local.commit_create_table(&definition.table, &text).await
    }

    /// Alters a table: overwrites the published definition (log order is
    /// the authority, so no version check), then commits locally.
    ///
    /// # Errors
    ///
    /// Metadata and local failures pass through.
    pub async fn commit_alter_table(
        &self,
        table: &str,
        definition: &TableDefinition,
        ctx: &QueryContext,
    ) -> Result<()> {
        let text = definition.canonical_for_group()?.to_canonical_text()?;
        self.add_initial_op(ctx, Op::set(self.paths.table_metadata(table), text.as_str()));
        self.commit_metadata(ctx).await?;
        self.local.commit_alter_table(table, &text).await
    }

    /// Drops a table: removes the published definition, then drops locally.
    ///
    /// # Errors
    ///
    /// Metadata and local failures pass through.
    pub async fn drop_table(&self, table: &str, ctx: &QueryContext) -> Result<()> {
        debug_assert!(!self.is_replication_active() || ctx.transaction().is_some());
        self.add_initial_op(ctx, Op::remove(self.paths.table_metadata(table)));
        self.commit_metadata(ctx).await?;
        self.local.drop_table(table).await
    }

    /// Renames (or exchanges) tables within this group.
    ///
    /// # Errors
    ///
    /// `IncorrectQuery`/`UnknownTable` on the fail-fast pre-checks of the
    /// initial query; metadata and local failures pass through.
    pub async fn rename_table(
        &self,
        from: &str,
        to: &str,
        exchange: bool,
        ctx: &QueryContext,
    ) -> Result<()> {
        if ctx.is_initial_query() {
            if from == to {
                return Err(ReplicationError::incorrect_query(
                    "cannot rename table to itself",
                ));
            }
            if !self.local.is_table(from).await? {
                return Err(ReplicationError::unknown_table(from));
            }
            if exchange && !self.local.is_table(to).await? {
                return Err(ReplicationError::unknown_table(to));
            }

            if let Some(txn) = ctx.transaction() {
                if txn.is_initial_query() {
                    let statement = self.local.read_definition(from).await?;
                    txn.add_op(Op::remove(self.paths.table_metadata(from)));
                    if exchange {
                        let statement_to = self.local.read_definition(to).await?;
                        txn.add_op(Op::remove(self.paths.table_metadata(to)));
                        txn.add_op(Op::Create {
                            path: self.paths.table_metadata(from),
                            data: statement_to,
                            mode: CreateMode::Persistent,
                        });
                    }
                    txn.add_op(Op::Create {
                        path: self.paths.table_metadata(to),
                        data: statement,
                        mode: CreateMode::Persistent,
                    });
                }
            }
        }
        self.commit_metadata(ctx).await?;

        if exchange {
            let from_text = self.local.detach_for_move(from).await?;
            let to_text = self.local.detach_for_move(to).await?;
            self.local.attach_from_move(from, &to_text).await?;
            self.local.attach_from_move(to, &from_text).await
        } else {
            let text = self.local.detach_for_move(from).await?;
            self.local.attach_from_move(to, &text).await
        }
    }

    /// Creates a dictionary: same shape as table creation.
    ///
    /// # Errors
    ///
    /// Duplicate names fail the metadata commit; local failures pass
    /// through.
    pub async fn create_dictionary(
        &self,
        definition: &TableDefinition,
        ctx: &QueryContext,
    ) -> Result<()> {
        debug_assert!(!self.is_replication_active() || ctx.transaction().is_some());
        let text = definition.canonical_for_group()?.to_canonical_text()?;
        self.add_initial_op(ctx, Op::Create {
            path: self.paths.table_metadata(&definition.table),
            data: text.clone(),
            mode: CreateMode::Persistent,
        });
        self.commit_metadata(ctx).await?;
        self.local.create_dictionary(&definition.table, &text).await
    }

    /// Drops a dictionary.
    ///
    /// # Errors
    ///
    /// Metadata and local failures pass through.
    pub async fn remove_dictionary(&self, name: &str, ctx: &QueryContext) -> Result<()> {
        debug_assert!(!self.is_replication_active() || ctx.transaction().is_some());
        self.add_initial_op(ctx, Op::remove(self.paths.table_metadata(name)));
        self.commit_metadata(ctx).await?;
        self.local.remove_dictionary(name).await
    }

    /// Permanently detaches a table; the group forgets its definition.
    ///
    /// # Errors
    ///
    /// Metadata and local failures pass through.
    pub async fn detach_table_permanently(&self, table: &str, ctx: &QueryContext) -> Result<()> {
        debug_assert!(!self.is_replication_active() || ctx.transaction().is_some());
        self.add_initial_op(ctx, Op::remove(self.paths.table_metadata(table)));
        self.commit_metadata(ctx).await?;
        self.local.detach_table_permanently(table).await
    }

    fn add_initial_op(&self, ctx: &QueryContext, op: Op) {
        if let Some(txn) = ctx.transaction() {
            if txn.is_initial_query() {
                txn.add_op(op);
            }
        }
    }

    async fn commit_metadata(&self, ctx: &QueryContext) -> Result<()> {
        match ctx.transaction() {
            Some(txn) => txn.commit(self.coordinator.as_ref()).await,
            None => Ok(()),
        }
    }

    // ========================================================================
    // Drop and shutdown
    // ========================================================================

    /// Drops this replica's membership and its local database. The last
    /// replica to leave removes the whole group tree.
    ///
    /// A replica that dies between its own removal and the group probe can
    /// leave the group tree behind; that garbage is tolerated.
    ///
    /// # Errors
    ///
    /// Coordination and local failures pass through.
    pub async fn drop_database(&self) -> Result<()> {
        self.coordinator
            .set(&self.replica_path, crate::paths::DROPPED_MARK, None)
            .await?;
        self.local.drop_database().await?;
        self.registry.deregister(&self.name);
        self.coordinator.remove_recursive(&self.replica_path).await?;

        match self.coordinator.remove(&self.paths.replicas_dir(), None).await {
            Ok(()) => {
                // Removing the replicas directory proves no siblings remain.
                tracing::info!(group = self.paths.root(), "last replica left, removing group");
                self.coordinator.remove_recursive(self.paths.root()).await?;
            }
            Err(CoordError::NotEmpty { .. } | CoordError::NoNode { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Stops the log follower, if running.
    pub async fn stop_replication(&self) {
        let follower = self
            .follower
            .read()
            .expect("follower lock poisoned")
            .clone();
        if let Some(follower) = follower {
            follower.shutdown().await;
        }
    }

    /// Shuts the replica down: follower first, then its handle, then the
    /// local store.
    pub async fn shutdown(&self) {
        self.stop_replication().await;
        *self.follower.write().expect("follower lock poisoned") = None;
        self.local.shutdown().await;
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// The local database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// This replica's coordinates.
    #[must_use]
    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica
    }

    /// This node's host identity.
    #[must_use]
    pub fn host_id(&self) -> &HostId {
        &self.host_id
    }

    /// Path helpers for the group.
    #[must_use]
    pub fn group_paths(&self) -> &GroupPaths {
        &self.paths
    }

    /// The replica's settings.
    #[must_use]
    pub fn settings(&self) -> &CatalogSettings {
        &self.settings
    }

    /// The coordination-store session.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coordinator
    }

    /// The local schema store.
    #[must_use]
    pub fn local_store(&self) -> &Arc<dyn SchemaStore> {
        &self.local
    }

    /// The process-wide catalog registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<CatalogRegistry> {
        &self.registry
    }

    /// The current follower, if replication has been started.
    #[must_use]
    pub fn follower(&self) -> Option<Arc<dyn LogFollower>> {
        self.follower.read().expect("follower lock poisoned").clone()
    }

    /// Whether the follower is active.
    #[must_use]
    pub fn is_replication_active(&self) -> bool {
        self.follower()
            .is_some_and(|f| f.is_currently_active())
    }
}

fn statement_database(statement: &DdlStatement) -> Option<&str> {
    match statement {
        DdlStatement::CreateTable { definition } | DdlStatement::CreateDictionary { definition } => {
            definition.database.as_deref()
        }
        DdlStatement::DropTable { database, .. }
        | DdlStatement::RenameTable { database, .. }
        | DdlStatement::AlterTable { database, .. }
        | DdlStatement::DropDictionary { database, .. }
        | DdlStatement::DetachTablePermanently { database, .. } => database.as_deref(),
    }
}
