//! In-memory coordination store for testing.
//!
//! [`MemoryCoordination`] is the shared store; each [`MemorySession`] is one
//! client connection implementing [`Coordinator`]. Ephemeral nodes belong to
//! the session that created them and are reaped when it closes (or is
//! dropped). Thread-safe via a single mutex; not suitable for production.
//!
//! Sequential suffixes follow the store contract: within one parent they are
//! strictly increasing over the parent's lifetime, counting every child ever
//! created under it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::client::{ChildrenWatch, Coordinator};
use crate::error::{CoordError, Result};
use crate::types::{CreateMode, Op, OpResult, Stat};

#[derive(Debug, Clone)]
struct Node {
    data: String,
    version: i64,
    cversion: i64,
    /// Count of children ever created under this node; source of sequential
    /// suffixes.
    seq_counter: u64,
    ephemeral_owner: Option<u64>,
}

impl Node {
    fn new(data: String, ephemeral_owner: Option<u64>) -> Self {
        Self {
            data,
            version: 0,
            cversion: 0,
            seq_counter: 0,
            ephemeral_owner,
        }
    }

    fn stat(&self) -> Stat {
        Stat {
            version: self.version,
            cversion: self.cversion,
        }
    }
}

#[derive(Debug, Default)]
struct Store {
    nodes: BTreeMap<String, Node>,
    watches: HashMap<String, watch::Sender<i64>>,
    next_session: u64,
}

/// The shared in-memory store backing any number of sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryCoordination {
    store: Arc<Mutex<Store>>,
}

impl MemoryCoordination {
    /// Creates an empty store containing only the root node.
    #[must_use]
    pub fn new() -> Self {
        let mut store = Store::default();
        store.nodes.insert("/".to_string(), Node::new(String::new(), None));
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Opens a new session.
    #[must_use]
    pub fn session(&self) -> MemorySession {
        let mut store = self.store.lock().expect("store mutex poisoned");
        store.next_session += 1;
        MemorySession {
            store: Arc::clone(&self.store),
            session_id: store.next_session,
            closed: AtomicBool::new(false),
        }
    }
}

/// One client session of a [`MemoryCoordination`] store.
#[derive(Debug)]
pub struct MemorySession {
    store: Arc<Mutex<Store>>,
    session_id: u64,
    closed: AtomicBool,
}

impl MemorySession {
    /// Closes the session, reaping every ephemeral node it owns. Idempotent;
    /// also runs on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut store = match self.store.lock() {
            Ok(store) => store,
            Err(_) => return,
        };
        let owned: Vec<String> = store
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(self.session_id))
            .map(|(path, _)| path.clone())
            .collect();
        for path in owned {
            let _ = do_remove(&mut store.nodes, &path, None);
            notify_children_changed(&mut store, &parent_path(&path));
        }
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.close();
    }
}

fn parent_path(path: &str) -> String {
    match path.rsplit_once('/') {
        Some(("", _)) | None => "/".to_string(),
        Some((parent, _)) => parent.to_string(),
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

fn validate_path(path: &str) -> Result<()> {
    let well_formed = path.starts_with('/')
        && (path == "/" || (!path.ends_with('/') && !path.contains("//")));
    if well_formed {
        Ok(())
    } else {
        Err(CoordError::unavailable(format!("malformed path: {path:?}")))
    }
}

fn list_children(nodes: &BTreeMap<String, Node>, path: &str) -> Vec<String> {
    let prefix = child_prefix(path);
    nodes
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .filter_map(|(key, _)| {
            let rest = &key[prefix.len()..];
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        })
        .collect()
}

fn do_create(
    nodes: &mut BTreeMap<String, Node>,
    path: &str,
    data: &str,
    mode: CreateMode,
    session_id: u64,
) -> Result<String> {
    validate_path(path)?;
    if path == "/" {
        return Err(CoordError::node_exists(path));
    }
    let parent = parent_path(path);
    if !nodes.contains_key(&parent) {
        return Err(CoordError::no_node(parent));
    }

    let actual_path = if mode.is_sequential() {
        let suffix = nodes[&parent].seq_counter;
        format!("{path}{suffix:010}")
    } else if nodes.contains_key(path) {
        return Err(CoordError::node_exists(path));
    } else {
        path.to_string()
    };
    let parent_node = nodes.get_mut(&parent).expect("parent checked above");
    parent_node.seq_counter += 1;
    parent_node.cversion += 1;

    let owner = mode.is_ephemeral().then_some(session_id);
    nodes.insert(actual_path.clone(), Node::new(data.to_string(), owner));
    Ok(actual_path)
}

fn do_set(
    nodes: &mut BTreeMap<String, Node>,
    path: &str,
    data: &str,
    version: Option<i64>,
) -> Result<()> {
    let Some(node) = nodes.get_mut(path) else {
        return Err(CoordError::no_node(path));
    };
    if let Some(expected) = version {
        if node.version != expected {
            return Err(CoordError::BadVersion {
                path: path.to_string(),
            });
        }
    }
    node.data = data.to_string();
    node.version += 1;
    Ok(())
}

fn do_remove(nodes: &mut BTreeMap<String, Node>, path: &str, version: Option<i64>) -> Result<()> {
    let Some(node) = nodes.get(path) else {
        return Err(CoordError::no_node(path));
    };
    if let Some(expected) = version {
        if node.version != expected {
            return Err(CoordError::BadVersion {
                path: path.to_string(),
            });
        }
    }
    if !list_children(nodes, path).is_empty() {
        return Err(CoordError::NotEmpty {
            path: path.to_string(),
        });
    }
    nodes.remove(path);
    if let Some(parent) = nodes.get_mut(&parent_path(path)) {
        parent.cversion += 1;
    }
    Ok(())
}

fn do_check(nodes: &BTreeMap<String, Node>, path: &str, version: i64) -> Result<()> {
    let Some(node) = nodes.get(path) else {
        return Err(CoordError::no_node(path));
    };
    if node.version != version {
        return Err(CoordError::BadVersion {
            path: path.to_string(),
        });
    }
    Ok(())
}

fn notify_children_changed(store: &mut Store, path: &str) {
    let cversion = store.nodes.get(path).map_or(-1, |n| n.cversion);
    if let Some(tx) = store.watches.get(path) {
        tx.send_replace(cversion);
    }
}

#[async_trait]
impl Coordinator for MemorySession {
    async fn create(&self, path: &str, data: &str, mode: CreateMode) -> Result<String> {
        let mut store = self.lock()?;
        let actual = do_create(&mut store.nodes, path, data, mode, self.session_id)?;
        notify_children_changed(&mut store, &parent_path(path));
        Ok(actual)
    }

    async fn create_ancestors(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut store = self.lock()?;
        let mut prefix = String::new();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        // All segments except the last are ancestors.
        for segment in &segments[..segments.len().saturating_sub(1)] {
            prefix.push('/');
            prefix.push_str(segment);
            if !store.nodes.contains_key(&prefix) {
                do_create(&mut store.nodes, &prefix, "", CreateMode::Persistent, self.session_id)?;
                notify_children_changed(&mut store, &parent_path(&prefix));
            }
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<String> {
        let store = self.lock()?;
        store
            .nodes
            .get(path)
            .map(|n| n.data.clone())
            .ok_or_else(|| CoordError::no_node(path))
    }

    async fn try_get(&self, path: &str) -> Result<Option<String>> {
        let store = self.lock()?;
        Ok(store.nodes.get(path).map(|n| n.data.clone()))
    }

    async fn get_with_stat(&self, path: &str) -> Result<(String, Stat)> {
        let store = self.lock()?;
        store
            .nodes
            .get(path)
            .map(|n| (n.data.clone(), n.stat()))
            .ok_or_else(|| CoordError::no_node(path))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let store = self.lock()?;
        Ok(store.nodes.contains_key(path))
    }

    async fn set(&self, path: &str, data: &str, version: Option<i64>) -> Result<()> {
        let mut store = self.lock()?;
        do_set(&mut store.nodes, path, data, version)
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let store = self.lock()?;
        if !store.nodes.contains_key(path) {
            return Err(CoordError::no_node(path));
        }
        Ok(list_children(&store.nodes, path))
    }

    async fn children_with_stat(&self, path: &str) -> Result<(Vec<String>, Stat)> {
        let store = self.lock()?;
        let Some(node) = store.nodes.get(path) else {
            return Err(CoordError::no_node(path));
        };
        Ok((list_children(&store.nodes, path), node.stat()))
    }

    async fn multi(&self, ops: Vec<Op>) -> Result<Vec<OpResult>> {
        let mut store = self.lock()?;

        // Stage every op against a copy so a mid-sequence failure leaves the
        // store untouched.
        let mut staged = store.nodes.clone();
        let mut results = Vec::with_capacity(ops.len());
        let mut touched_parents = Vec::new();
        for op in &ops {
            match op {
                Op::Create { path, data, mode } => {
                    let actual = do_create(&mut staged, path, data, *mode, self.session_id)?;
                    touched_parents.push(parent_path(path));
                    results.push(OpResult::Created { path: actual });
                }
                Op::Set {
                    path,
                    data,
                    version,
                } => {
                    do_set(&mut staged, path, data, *version)?;
                    results.push(OpResult::Set);
                }
                Op::Remove { path, version } => {
                    do_remove(&mut staged, path, *version)?;
                    touched_parents.push(parent_path(path));
                    results.push(OpResult::Removed);
                }
                Op::Check { path, version } => {
                    do_check(&staged, path, *version)?;
                    results.push(OpResult::Checked);
                }
            }
        }

        store.nodes = staged;
        touched_parents.sort();
        touched_parents.dedup();
        for parent in touched_parents {
            notify_children_changed(&mut store, &parent);
        }
        Ok(results)
    }

    async fn remove(&self, path: &str, version: Option<i64>) -> Result<()> {
        let mut store = self.lock()?;
        do_remove(&mut store.nodes, path, version)?;
        notify_children_changed(&mut store, &parent_path(path));
        Ok(())
    }

    async fn remove_recursive(&self, path: &str) -> Result<()> {
        validate_path(path)?;
        let mut store = self.lock()?;
        let prefix = child_prefix(path);
        let doomed: Vec<String> = store
            .nodes
            .range(path.to_string()..)
            .take_while(|(key, _)| *key == path || key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        if doomed.is_empty() {
            return Ok(());
        }
        for key in &doomed {
            store.nodes.remove(key);
        }
        if let Some(parent) = store.nodes.get_mut(&parent_path(path)) {
            parent.cversion += 1;
        }
        notify_children_changed(&mut store, &parent_path(path));
        Ok(())
    }

    async fn watch_children(&self, path: &str) -> Result<ChildrenWatch> {
        let mut store = self.lock()?;
        let Some(node) = store.nodes.get(path) else {
            return Err(CoordError::no_node(path));
        };
        let cversion = node.cversion;
        let children = list_children(&store.nodes, path);
        let sender = store
            .watches
            .entry(path.to_string())
            .or_insert_with(|| watch::channel(cversion).0);
        Ok(ChildrenWatch {
            children,
            updates: sender.subscribe(),
        })
    }
}

impl MemorySession {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Store>> {
        self.store
            .lock()
            .map_err(|_| CoordError::unavailable("store mutex poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (MemoryCoordination, MemorySession) {
        let store = MemoryCoordination::new();
        let session = store.session();
        (store, session)
    }

    #[tokio::test]
    async fn create_get_roundtrip() {
        let (_store, s) = session();
        s.create("/a", "hello", CreateMode::Persistent).await.unwrap();
        assert_eq!(s.get("/a").await.unwrap(), "hello");
        assert!(matches!(
            s.get("/missing").await,
            Err(CoordError::NoNode { .. })
        ));
    }

    #[tokio::test]
    async fn create_requires_parent() {
        let (_store, s) = session();
        assert!(matches!(
            s.create("/a/b", "", CreateMode::Persistent).await,
            Err(CoordError::NoNode { .. })
        ));
    }

    #[tokio::test]
    async fn sequential_suffixes_strictly_increase() {
        let (_store, s) = session();
        s.create("/ctr", "", CreateMode::Persistent).await.unwrap();

        let first = s
            .create("/ctr/cnt-", "", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        let second = s
            .create("/ctr/cnt-", "", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        assert_eq!(first, "/ctr/cnt-0000000000");
        assert_eq!(second, "/ctr/cnt-0000000001");

        // A plain create-and-delete still advances the counter.
        s.create("/ctr/plain", "", CreateMode::Persistent).await.unwrap();
        s.remove("/ctr/plain", None).await.unwrap();
        let third = s
            .create("/ctr/cnt-", "", CreateMode::EphemeralSequential)
            .await
            .unwrap();
        assert_eq!(third, "/ctr/cnt-0000000003");
    }

    #[tokio::test]
    async fn versioned_set_and_remove() {
        let (_store, s) = session();
        s.create("/v", "a", CreateMode::Persistent).await.unwrap();

        s.set("/v", "b", Some(0)).await.unwrap();
        assert!(matches!(
            s.set("/v", "c", Some(0)).await,
            Err(CoordError::BadVersion { .. })
        ));
        s.set("/v", "c", None).await.unwrap();

        assert!(matches!(
            s.remove("/v", Some(0)).await,
            Err(CoordError::BadVersion { .. })
        ));
        s.remove("/v", Some(2)).await.unwrap();
        assert!(!s.exists("/v").await.unwrap());
    }

    #[tokio::test]
    async fn remove_rejects_non_empty() {
        let (_store, s) = session();
        s.create("/p", "", CreateMode::Persistent).await.unwrap();
        s.create("/p/c", "", CreateMode::Persistent).await.unwrap();
        assert!(matches!(
            s.remove("/p", None).await,
            Err(CoordError::NotEmpty { .. })
        ));
        s.remove_recursive("/p").await.unwrap();
        assert!(!s.exists("/p").await.unwrap());
        // Idempotent on a missing subtree.
        s.remove_recursive("/p").await.unwrap();
    }

    #[tokio::test]
    async fn multi_is_atomic() {
        let (_store, s) = session();
        s.create("/m", "", CreateMode::Persistent).await.unwrap();

        // Second op fails (node exists), so the first must not apply.
        s.create("/m/taken", "", CreateMode::Persistent).await.unwrap();
        let result = s
            .multi(vec![
                Op::create("/m/fresh", ""),
                Op::create("/m/taken", ""),
            ])
            .await;
        assert!(matches!(result, Err(CoordError::NodeExists { .. })));
        assert!(!s.exists("/m/fresh").await.unwrap());

        let results = s
            .multi(vec![
                Op::create("/m/fresh", "x"),
                Op::remove("/m/taken"),
            ])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(s.exists("/m/fresh").await.unwrap());
        assert!(!s.exists("/m/taken").await.unwrap());
    }

    #[tokio::test]
    async fn ephemerals_reaped_on_session_close() {
        let store = MemoryCoordination::new();
        let a = store.session();
        let b = store.session();
        a.create("/e", "", CreateMode::Persistent).await.unwrap();
        a.create("/e/mine", "", CreateMode::Ephemeral).await.unwrap();
        b.create("/e/theirs", "", CreateMode::Ephemeral).await.unwrap();

        a.close();
        assert!(!b.exists("/e/mine").await.unwrap());
        assert!(b.exists("/e/theirs").await.unwrap());
    }

    #[tokio::test]
    async fn children_with_stat_fingerprints_changes() {
        let (_store, s) = session();
        s.create("/cs", "", CreateMode::Persistent).await.unwrap();
        let (_, before) = s.children_with_stat("/cs").await.unwrap();

        s.create("/cs/one", "", CreateMode::Persistent).await.unwrap();
        let (children, after) = s.children_with_stat("/cs").await.unwrap();
        assert_eq!(children, vec!["one".to_string()]);
        assert_ne!(before.cversion, after.cversion);
    }

    #[tokio::test]
    async fn watch_fires_on_child_change() {
        let (_store, s) = session();
        s.create("/w", "", CreateMode::Persistent).await.unwrap();
        let mut watch = s.watch_children("/w").await.unwrap();
        assert!(watch.children.is_empty());

        s.create("/w/new", "", CreateMode::Persistent).await.unwrap();
        watch.updates.changed().await.unwrap();
        assert_eq!(s.children("/w").await.unwrap(), vec!["new".to_string()]);
    }
}
