//! The coordination-store client contract.

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::Result;
use crate::types::{CreateMode, Op, OpResult, Stat};

/// A child-list snapshot plus a channel that ticks on changes.
///
/// The receiver carries the node's `cversion`; callers re-list children when
/// it changes. Watches never fire spuriously for data-only writes.
#[derive(Debug)]
pub struct ChildrenWatch {
    /// The child names at the time the watch was installed.
    pub children: Vec<String>,
    /// Receives the node's `cversion` whenever its child list changes.
    pub updates: watch::Receiver<i64>,
}

/// Client contract for a ZooKeeper-class coordination store.
///
/// All implementations must provide linearizable writes, per-parent strictly
/// increasing sequential suffixes, and atomic multi-ops. Methods that name a
/// missing node fail with [`CoordError::NoNode`](crate::CoordError::NoNode)
/// unless documented otherwise.
#[async_trait]
pub trait Coordinator: Send + Sync + 'static {
    /// Creates a node and returns its actual path (sequential modes append
    /// the suffix).
    ///
    /// # Errors
    ///
    /// `NodeExists` for non-sequential modes if the path is taken; `NoNode`
    /// if the parent is missing.
    async fn create(&self, path: &str, data: &str, mode: CreateMode) -> Result<String>;

    /// Creates every missing ancestor of `path` (not `path` itself) as empty
    /// persistent nodes. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error only on store failure.
    async fn create_ancestors(&self, path: &str) -> Result<()>;

    /// Reads a node's value.
    ///
    /// # Errors
    ///
    /// `NoNode` if the node does not exist.
    async fn get(&self, path: &str) -> Result<String>;

    /// Reads a node's value, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error only on store failure.
    async fn try_get(&self, path: &str) -> Result<Option<String>>;

    /// Reads a node's value together with its [`Stat`], for version-guarded
    /// writes.
    ///
    /// # Errors
    ///
    /// `NoNode` if the node does not exist.
    async fn get_with_stat(&self, path: &str) -> Result<(String, Stat)>;

    /// Whether a node exists.
    ///
    /// # Errors
    ///
    /// Returns an error only on store failure.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Writes a node's value, optionally guarded by its current version.
    ///
    /// # Errors
    ///
    /// `NoNode` if missing; `BadVersion` if the guard does not match.
    async fn set(&self, path: &str, data: &str, version: Option<i64>) -> Result<()>;

    /// Lists a node's children (names only, unordered).
    ///
    /// # Errors
    ///
    /// `NoNode` if the node does not exist.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Lists a node's children together with its [`Stat`], for
    /// retry-until-stable reads fingerprinted by `cversion`.
    ///
    /// # Errors
    ///
    /// `NoNode` if the node does not exist.
    async fn children_with_stat(&self, path: &str) -> Result<(Vec<String>, Stat)>;

    /// Executes the given ops atomically: either every op applies or none
    /// does.
    ///
    /// # Errors
    ///
    /// The error of the first failing op.
    async fn multi(&self, ops: Vec<Op>) -> Result<Vec<OpResult>>;

    /// Removes a node, optionally guarded by its current version.
    ///
    /// # Errors
    ///
    /// `NoNode` if missing; `NotEmpty` if it has children; `BadVersion` if
    /// the guard does not match.
    async fn remove(&self, path: &str, version: Option<i64>) -> Result<()>;

    /// Removes a node and everything below it. Succeeds if the node does not
    /// exist (idempotent).
    ///
    /// # Errors
    ///
    /// Returns an error only on store failure.
    async fn remove_recursive(&self, path: &str) -> Result<()>;

    /// Installs a child-list watch on a node.
    ///
    /// # Errors
    ///
    /// `NoNode` if the node does not exist.
    async fn watch_children(&self, path: &str) -> Result<ChildrenWatch>;
}
