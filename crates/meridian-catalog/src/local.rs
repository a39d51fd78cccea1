//! The local schema store and the process-wide catalog registry.
//!
//! A [`SchemaStore`] is one database of the engine's default transactional
//! catalog: it owns the on-disk definitions of that database's tables and
//! dictionaries. The replication layer drives it but never reaches around
//! it. Definitions are stored in the same canonical text used by the group's
//! authoritative catalog, so a local definition and its coordination-store
//! counterpart can be compared byte for byte.
//!
//! [`MemorySchemaStore`] is the in-memory implementation used in tests.
//!
//! [`CatalogRegistry`] models the process-wide database catalog as an
//! explicit handle: databases by name, per-`(database, table)` DDL guards,
//! and the dropped-table reaping recovery waits on.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use meridian_core::TableDefinition;

use crate::error::{ReplicationError, Result};

/// One database of the local transactional catalog.
///
/// Implementations must tolerate re-committing an identical create (log
/// replay after a partially applied entry); all other duplicate or missing
/// names are errors.
#[async_trait]
pub trait SchemaStore: Send + Sync + 'static {
    /// The database name this store is bound to.
    fn database_name(&self) -> &str;

    /// Lists every table and dictionary.
    async fn list_objects(&self) -> Result<Vec<String>>;

    /// Whether a table with this name exists.
    async fn is_table(&self, name: &str) -> Result<bool>;

    /// Whether a dictionary with this name exists.
    async fn is_dictionary(&self, name: &str) -> Result<bool>;

    /// Reads an object's canonical definition text.
    async fn read_definition(&self, name: &str) -> Result<String>;

    /// Reads an object's canonical definition text, or `None` if absent.
    async fn try_read_definition(&self, name: &str) -> Result<Option<String>>;

    /// The object's UUID, when its definition carries one.
    async fn object_uuid(&self, name: &str) -> Result<Option<Uuid>>;

    /// Whether any object in this database has the given UUID.
    async fn contains_uuid(&self, uuid: Uuid) -> Result<bool>;

    /// Makes a table's creation durable.
    async fn commit_create_table(&self, table: &str, definition: &str) -> Result<()>;

    /// Makes an altered definition durable.
    async fn commit_alter_table(&self, table: &str, definition: &str) -> Result<()>;

    /// Drops a table, shutting its storage down first.
    async fn drop_table(&self, table: &str) -> Result<()>;

    /// Makes a dictionary's creation durable.
    async fn create_dictionary(&self, name: &str, definition: &str) -> Result<()>;

    /// Drops a dictionary.
    async fn remove_dictionary(&self, name: &str) -> Result<()>;

    /// Detaches a table so it never reattaches on restart.
    async fn detach_table_permanently(&self, table: &str) -> Result<()>;

    /// Removes an object as the source side of a rename, returning its
    /// definition text.
    async fn detach_for_move(&self, name: &str) -> Result<String>;

    /// Installs a definition as the destination side of a rename.
    async fn attach_from_move(&self, name: &str, definition: &str) -> Result<()>;

    /// Stops background activity; no mutations after this.
    async fn shutdown(&self);

    /// Drops the whole database with its objects.
    async fn drop_database(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    definition: String,
    uuid: Option<Uuid>,
    dictionary: bool,
}

/// In-memory [`SchemaStore`] for tests.
#[derive(Debug)]
pub struct MemorySchemaStore {
    name: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemorySchemaStore {
    /// Creates an empty store for a database name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    fn objects(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.read().expect("objects lock poisoned")
    }

    fn objects_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.write().expect("objects lock poisoned")
    }

    fn insert_object(&self, name: &str, definition: &str, dictionary: bool) -> Result<()> {
        let uuid = TableDefinition::parse(definition).ok().and_then(|d| d.uuid);
        let mut objects = self.objects_mut();
        if let Some(existing) = objects.get(name) {
            if existing.definition == definition && existing.dictionary == dictionary {
                // Replay of an already-applied create.
                return Ok(());
            }
            return Err(ReplicationError::bad_arguments(format!(
                "object {name:?} already exists in database {:?}",
                self.name
            )));
        }
        objects.insert(
            name.to_string(),
            StoredObject {
                definition: definition.to_string(),
                uuid,
                dictionary,
            },
        );
        Ok(())
    }

    fn remove_object(&self, name: &str, dictionary: bool) -> Result<StoredObject> {
        let mut objects = self.objects_mut();
        match objects.get(name) {
            Some(object) if object.dictionary == dictionary => {
                Ok(objects.remove(name).expect("object checked above"))
            }
            _ => Err(ReplicationError::unknown_table(name)),
        }
    }
}

#[async_trait]
impl SchemaStore for MemorySchemaStore {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn list_objects(&self) -> Result<Vec<String>> {
        Ok(self.objects().keys().cloned().collect())
    }

    async fn is_table(&self, name: &str) -> Result<bool> {
        Ok(self.objects().get(name).is_some_and(|o| !o.dictionary))
    }

    async fn is_dictionary(&self, name: &str) -> Result<bool> {
        Ok(self.objects().get(name).is_some_and(|o| o.dictionary))
    }

    async fn read_definition(&self, name: &str) -> Result<String> {
        self.objects()
            .get(name)
            .map(|o| o.definition.clone())
            .ok_or_else(|| ReplicationError::unknown_table(name))
    }

    async fn try_read_definition(&self, name: &str) -> Result<Option<String>> {
        Ok(self.objects().get(name).map(|o| o.definition.clone()))
    }

    async fn object_uuid(&self, name: &str) -> Result<Option<Uuid>> {
        Ok(self.objects().get(name).and_then(|o| o.uuid))
    }

    async fn contains_uuid(&self, uuid: Uuid) -> Result<bool> {
        Ok(self.objects().values().any(|o| o.uuid == Some(uuid)))
    }

    async fn commit_create_table(&self, table: &str, definition: &str) -> Result<()> {
        self.insert_object(table, definition, false)
    }

    async fn commit_alter_table(&self, table: &str, definition: &str) -> Result<()> {
        let mut objects = self.objects_mut();
        let Some(object) = objects.get_mut(table) else {
            return Err(ReplicationError::unknown_table(table));
        };
        object.definition = definition.to_string();
        Ok(())
    }

    async fn drop_table(&self, table: &str) -> Result<()> {
        self.remove_object(table, false).map(|_| ())
    }

    async fn create_dictionary(&self, name: &str, definition: &str) -> Result<()> {
        self.insert_object(name, definition, true)
    }

    async fn remove_dictionary(&self, name: &str) -> Result<()> {
        self.remove_object(name, true).map(|_| ())
    }

    async fn detach_table_permanently(&self, table: &str) -> Result<()> {
        self.remove_object(table, false).map(|_| ())
    }

    async fn detach_for_move(&self, name: &str) -> Result<String> {
        let mut objects = self.objects_mut();
        objects
            .remove(name)
            .map(|o| o.definition)
            .ok_or_else(|| ReplicationError::unknown_table(name))
    }

    async fn attach_from_move(&self, name: &str, definition: &str) -> Result<()> {
        let mut objects = self.objects_mut();
        if objects.contains_key(name) {
            return Err(ReplicationError::bad_arguments(format!(
                "object {name:?} already exists in database {:?}",
                self.name
            )));
        }
        let uuid = TableDefinition::parse(definition).ok().and_then(|d| d.uuid);
        objects.insert(
            name.to_string(),
            StoredObject {
                definition: definition.to_string(),
                uuid,
                dictionary: false,
            },
        );
        Ok(())
    }

    async fn shutdown(&self) {}

    async fn drop_database(&self) -> Result<()> {
        self.objects_mut().clear();
        Ok(())
    }
}

/// Builds a database on demand (quarantine databases during recovery).
pub type DatabaseFactory = Box<dyn Fn(&str) -> Arc<dyn SchemaStore> + Send + Sync>;

/// The process-wide catalog of databases.
pub struct CatalogRegistry {
    databases: RwLock<HashMap<String, Arc<dyn SchemaStore>>>,
    guards: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
    factory: DatabaseFactory,
}

impl std::fmt::Debug for CatalogRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .databases
            .read()
            .map(|dbs| dbs.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("CatalogRegistry")
            .field("databases", &names)
            .finish()
    }
}

impl CatalogRegistry {
    /// Creates a registry with the given database factory.
    #[must_use]
    pub fn new(factory: DatabaseFactory) -> Arc<Self> {
        Arc::new(Self {
            databases: RwLock::new(HashMap::new()),
            guards: Mutex::new(HashMap::new()),
            factory,
        })
    }

    /// Creates a registry whose databases are in-memory stores.
    #[must_use]
    pub fn in_memory() -> Arc<Self> {
        Self::new(Box::new(|name| Arc::new(MemorySchemaStore::new(name))))
    }

    /// Registers a database under its own name, replacing any previous one.
    pub fn register(&self, store: Arc<dyn SchemaStore>) {
        self.databases
            .write()
            .expect("registry lock poisoned")
            .insert(store.database_name().to_string(), store);
    }

    /// Removes a database from the registry.
    pub fn deregister(&self, name: &str) {
        self.databases
            .write()
            .expect("registry lock poisoned")
            .remove(name);
    }

    /// Looks a database up.
    ///
    /// # Errors
    ///
    /// Returns `UnknownDatabase` if no database has this name.
    pub fn database(&self, name: &str) -> Result<Arc<dyn SchemaStore>> {
        self.try_database(name)
            .ok_or_else(|| ReplicationError::UnknownDatabase {
                database: name.to_string(),
            })
    }

    /// Looks a database up, or `None`.
    #[must_use]
    pub fn try_database(&self, name: &str) -> Option<Arc<dyn SchemaStore>> {
        self.databases
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    /// Returns the database, creating it through the factory if absent.
    /// Idempotent.
    pub fn ensure_database(&self, name: &str) -> Arc<dyn SchemaStore> {
        if let Some(store) = self.try_database(name) {
            return store;
        }
        let store = (self.factory)(name);
        let mut databases = self.databases.write().expect("registry lock poisoned");
        databases
            .entry(name.to_string())
            .or_insert_with(|| store)
            .clone()
    }

    /// Acquires the DDL guard for one `(database, table)` pair. Callers
    /// taking several guards must acquire them in name order.
    pub async fn ddl_guard(&self, database: &str, table: &str) -> DdlGuard {
        let mutex = {
            let mut guards = self.guards.lock().expect("guards lock poisoned");
            Arc::clone(
                guards
                    .entry((database.to_string(), table.to_string()))
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };
        DdlGuard {
            _guard: mutex.lock_owned().await,
        }
    }

    /// Waits until no database holds an object with the given UUID, so a
    /// later create can reuse its name.
    ///
    /// # Errors
    ///
    /// Propagates store failures from the UUID scans.
    pub async fn wait_table_finally_dropped(&self, uuid: Uuid) -> Result<()> {
        loop {
            let stores: Vec<Arc<dyn SchemaStore>> = self
                .databases
                .read()
                .expect("registry lock poisoned")
                .values()
                .cloned()
                .collect();

            let mut still_present = false;
            for store in stores {
                if store.contains_uuid(uuid).await? {
                    still_present = true;
                    break;
                }
            }
            if !still_present {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Exclusive DDL access to one `(database, table)` pair.
#[derive(Debug)]
pub struct DdlGuard {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}
