//! The metadata transaction and query context.
//!
//! Every DDL execution carries a [`QueryContext`]. On the replica where the
//! client issued the statement (the *initial query*) the context holds a
//! [`MetadataTransaction`] that accumulates coordination-store ops; the
//! transaction commits as a single multi-op **before** the local catalog
//! mutation is made durable. On every other replica (*secondary query*) the
//! transaction is present but stays empty; the authoritative catalog was
//! already updated by the initiator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use meridian_coord::{Coordinator, Op};

use crate::error::{ReplicationError, Result};
use crate::paths::GroupPaths;

/// Whether a statement originated at this replica or is being replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// The client issued the statement here.
    Initial,
    /// The statement arrived through the replication log.
    Secondary,
}

/// Coordination-store ops accumulated during one DDL execution.
#[derive(Debug)]
pub struct MetadataTransaction {
    group_root: String,
    is_initial_query: bool,
    ops: Mutex<Vec<Op>>,
    committed: AtomicBool,
}

impl MetadataTransaction {
    /// Creates an empty transaction for the given group.
    #[must_use]
    pub fn new(paths: &GroupPaths, is_initial_query: bool) -> Self {
        Self {
            group_root: paths.root().to_string(),
            is_initial_query,
            ops: Mutex::new(Vec::new()),
            committed: AtomicBool::new(false),
        }
    }

    /// The group root this transaction targets.
    #[must_use]
    pub fn group_root(&self) -> &str {
        &self.group_root
    }

    /// Whether this execution is the initial query.
    #[must_use]
    pub fn is_initial_query(&self) -> bool {
        self.is_initial_query
    }

    /// Appends an op. Ops apply in insertion order at commit.
    pub fn add_op(&self, op: Op) {
        self.ops.lock().expect("transaction mutex poisoned").push(op);
    }

    /// Number of accumulated ops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.lock().expect("transaction mutex poisoned").len()
    }

    /// Whether no ops have been accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Commits the accumulated ops as one atomic multi-op. Committing an
    /// empty transaction is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a logical error on double commit, or the store's error when
    /// the multi-op fails (in which case nothing was applied).
    pub async fn commit(&self, coordinator: &dyn Coordinator) -> Result<()> {
        if self.committed.swap(true, Ordering::SeqCst) {
            return Err(ReplicationError::logical(
                "metadata transaction committed twice",
            ));
        }
        let ops = std::mem::take(&mut *self.ops.lock().expect("transaction mutex poisoned"));
        if ops.is_empty() {
            return Ok(());
        }
        coordinator.multi(ops).await?;
        Ok(())
    }
}

/// Context of one DDL execution.
#[derive(Debug, Clone)]
pub struct QueryContext {
    kind: QueryKind,
    txn: Option<Arc<MetadataTransaction>>,
    current_database: Option<String>,
    ddl_task_timeout: Option<Duration>,
}

impl QueryContext {
    /// A context for a client-issued statement.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            kind: QueryKind::Initial,
            txn: None,
            current_database: None,
            ddl_task_timeout: None,
        }
    }

    /// A context for a statement replayed from the log.
    #[must_use]
    pub fn secondary() -> Self {
        Self {
            kind: QueryKind::Secondary,
            txn: None,
            current_database: None,
            ddl_task_timeout: None,
        }
    }

    /// Overrides the acknowledgement wait for this statement.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.ddl_task_timeout = Some(timeout);
        self
    }

    /// Binds the statement to a database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.current_database = Some(database.into());
        self
    }

    /// Attaches a metadata transaction.
    #[must_use]
    pub fn with_transaction(mut self, txn: Arc<MetadataTransaction>) -> Self {
        self.txn = Some(txn);
        self
    }

    /// The execution kind.
    #[must_use]
    pub fn kind(&self) -> QueryKind {
        self.kind
    }

    /// Whether this is the initial query.
    #[must_use]
    pub fn is_initial_query(&self) -> bool {
        self.kind == QueryKind::Initial
    }

    /// The attached transaction, if any.
    #[must_use]
    pub fn transaction(&self) -> Option<&Arc<MetadataTransaction>> {
        self.txn.as_ref()
    }

    /// The bound database, if any.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.current_database.as_deref()
    }

    /// The acknowledgement wait override, if any.
    #[must_use]
    pub fn ddl_task_timeout(&self) -> Option<Duration> {
        self.ddl_task_timeout
    }
}
