//! Snapshot consistency under racing commits.
//!
//! A coordinator wrapper injects a commit between the metadata listing and
//! the `max_log_ptr` re-read, forcing the snapshot loop to retry; the
//! returned snapshot must reflect the advanced state, never a torn one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use meridian_catalog::{try_consistent_metadata_snapshot, GroupPaths};
use meridian_coord::{
    ChildrenWatch, CoordError, Coordinator, CreateMode, MemoryCoordination, MemorySession, Op,
    OpResult, Stat,
};
use meridian_core::GroupPath;

/// Delegates everything to an inner session, but commits a new table and
/// advances `max_log_ptr` once, right after the first metadata listing.
struct RacingCoordinator {
    inner: MemorySession,
    mutator: MemorySession,
    paths: GroupPaths,
    injected: AtomicBool,
}

impl RacingCoordinator {
    async fn inject_commit(&self) {
        self.mutator
            .create(&self.paths.table_metadata("late"), "late-definition", CreateMode::Persistent)
            .await
            .unwrap();
        self.mutator
            .set(&self.paths.max_log_ptr(), "4", None)
            .await
            .unwrap();
    }
}

#[async_trait]
impl Coordinator for RacingCoordinator {
    async fn create(
        &self,
        path: &str,
        data: &str,
        mode: CreateMode,
    ) -> Result<String, CoordError> {
        self.inner.create(path, data, mode).await
    }

    async fn create_ancestors(&self, path: &str) -> Result<(), CoordError> {
        self.inner.create_ancestors(path).await
    }

    async fn get(&self, path: &str) -> Result<String, CoordError> {
        self.inner.get(path).await
    }

    async fn try_get(&self, path: &str) -> Result<Option<String>, CoordError> {
        self.inner.try_get(path).await
    }

    async fn get_with_stat(&self, path: &str) -> Result<(String, Stat), CoordError> {
        self.inner.get_with_stat(path).await
    }

    async fn exists(&self, path: &str) -> Result<bool, CoordError> {
        self.inner.exists(path).await
    }

    async fn set(&self, path: &str, data: &str, version: Option<i64>) -> Result<(), CoordError> {
        self.inner.set(path, data, version).await
    }

    async fn children(&self, path: &str) -> Result<Vec<String>, CoordError> {
        let listing = self.inner.children(path).await?;
        if path == self.paths.metadata_dir() && !self.injected.swap(true, Ordering::SeqCst) {
            self.inject_commit().await;
        }
        Ok(listing)
    }

    async fn children_with_stat(&self, path: &str) -> Result<(Vec<String>, Stat), CoordError> {
        self.inner.children_with_stat(path).await
    }

    async fn multi(&self, ops: Vec<Op>) -> Result<Vec<OpResult>, CoordError> {
        self.inner.multi(ops).await
    }

    async fn remove(&self, path: &str, version: Option<i64>) -> Result<(), CoordError> {
        self.inner.remove(path, version).await
    }

    async fn remove_recursive(&self, path: &str) -> Result<(), CoordError> {
        self.inner.remove_recursive(path).await
    }

    async fn watch_children(&self, path: &str) -> Result<ChildrenWatch, CoordError> {
        self.inner.watch_children(path).await
    }
}

#[tokio::test]
async fn snapshot_retries_until_stable_under_racing_commit() {
    let store = MemoryCoordination::new();
    let paths = GroupPaths::new(&GroupPath::new("/g").unwrap());

    let seed = store.session();
    seed.create("/g", "", CreateMode::Persistent).await.unwrap();
    seed.create(&paths.metadata_dir(), "", CreateMode::Persistent)
        .await
        .unwrap();
    seed.create(&paths.max_log_ptr(), "3", CreateMode::Persistent)
        .await
        .unwrap();
    seed.create(&paths.table_metadata("early"), "early-definition", CreateMode::Persistent)
        .await
        .unwrap();

    let racing = Arc::new(RacingCoordinator {
        inner: store.session(),
        mutator: store.session(),
        paths: paths.clone(),
        injected: AtomicBool::new(false),
    });

    let snapshot = try_consistent_metadata_snapshot(racing.as_ref(), &paths, 3, 10)
        .await
        .unwrap();

    // The snapshot reflects the state at the advanced pointer: both tables
    // and the new max_log_ptr, never the torn in-between.
    assert_eq!(snapshot.max_log_ptr, 4);
    assert_eq!(snapshot.tables.len(), 2);
    assert_eq!(snapshot.tables["early"], "early-definition");
    assert_eq!(snapshot.tables["late"], "late-definition");
    assert!(racing.injected.load(Ordering::SeqCst));
}
