//! In-memory [`DocumentBackend`] for tests and hosts without a disk.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::Value;

use super::{DocumentBackend, DocumentConnection, SchemaUpgrade};
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Default)]
struct Database {
    version: u32,
    /// Bumped on every version change; connections from older generations
    /// are stale.
    generation: u64,
    containers: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Database {
    fn apply(&mut self, upgrade: &SchemaUpgrade) {
        for name in &upgrade.delete {
            self.containers.remove(name);
        }
        for name in &upgrade.create {
            self.containers.entry(name.clone()).or_default();
        }
    }
}

type Databases = Arc<RwLock<HashMap<String, Database>>>;

/// Versioned document backend held entirely in memory.
#[derive(Default)]
pub struct MemoryDocumentBackend {
    databases: Databases,
    opens: AtomicUsize,
}

impl std::fmt::Debug for MemoryDocumentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDocumentBackend")
            .field("opens", &self.open_count())
            .finish_non_exhaustive()
    }
}

impl MemoryDocumentBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful opens so far.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Stored schema version of database `name`, if it exists.
    #[must_use]
    pub fn stored_version(&self, name: &str) -> Option<u32> {
        self.databases
            .read()
            .ok()
            .and_then(|dbs| dbs.get(name).map(|db| db.version))
    }

    /// Make every open connection to `name` stale without changing its
    /// schema, as another process upgrading the database would.
    pub fn invalidate_connections(&self, name: &str) {
        if let Ok(mut dbs) = self.databases.write()
            && let Some(db) = dbs.get_mut(name)
        {
            db.generation = db.generation.saturating_add(1);
        }
    }
}

#[async_trait]
impl DocumentBackend for MemoryDocumentBackend {
    async fn open(
        &self,
        name: &str,
        version: Option<u32>,
        upgrade: &SchemaUpgrade,
    ) -> StorageResult<Arc<dyn DocumentConnection>> {
        let mut dbs = self
            .databases
            .write()
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        if let Some(db) = dbs.get_mut(name) {
            match version {
                Some(requested) if requested < db.version => {
                    return Err(StorageError::VersionConflict {
                        requested,
                        current: db.version,
                    });
                },
                Some(requested) if requested > db.version => {
                    db.apply(upgrade);
                    db.version = requested;
                    db.generation = db.generation.saturating_add(1);
                },
                _ => {},
            }
        } else {
            let mut db = Database {
                version: version.unwrap_or(1).max(1),
                generation: 1,
                containers: BTreeMap::new(),
            };
            db.apply(upgrade);
            dbs.insert(name.to_owned(), db);
        }
        let db = dbs
            .get(name)
            .ok_or_else(|| StorageError::Internal(format!("database {name} vanished")))?;

        let conn = MemoryConnection {
            databases: Arc::clone(&self.databases),
            name: name.to_owned(),
            version: db.version,
            generation: db.generation,
            containers: db.containers.keys().cloned().collect(),
            closed: AtomicBool::new(false),
        };
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(conn))
    }
}

struct MemoryConnection {
    databases: Databases,
    name: String,
    version: u32,
    generation: u64,
    containers: Vec<String>,
    closed: AtomicBool,
}

impl MemoryConnection {
    /// Run `f` against the live database after checking this connection is
    /// still current.
    fn with_db<T>(&self, f: impl FnOnce(&mut Database) -> StorageResult<T>) -> StorageResult<T> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::StaleConnection(format!(
                "connection to {} is closed",
                self.name
            )));
        }
        let mut dbs = self
            .databases
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let db = dbs
            .get_mut(&self.name)
            .ok_or_else(|| StorageError::StaleConnection(format!("{} was removed", self.name)))?;
        if db.generation != self.generation {
            return Err(StorageError::StaleConnection(format!(
                "{} moved to version {}",
                self.name, db.version
            )));
        }
        f(db)
    }

    fn container<'a>(
        db: &'a mut Database,
        name: &str,
    ) -> StorageResult<&'a mut BTreeMap<String, Value>> {
        db.containers
            .get_mut(name)
            .ok_or_else(|| StorageError::UnknownContainer(name.to_owned()))
    }
}

#[async_trait]
impl DocumentConnection for MemoryConnection {
    fn version(&self) -> u32 {
        self.version
    }

    fn container_names(&self) -> Vec<String> {
        self.containers.clone()
    }

    async fn put(&self, container: &str, key: &str, value: Value) -> StorageResult<()> {
        self.with_db(|db| {
            Self::container(db, container)?.insert(key.to_owned(), value);
            Ok(())
        })
    }

    async fn get(&self, container: &str, key: &str) -> StorageResult<Option<Value>> {
        self.with_db(|db| Ok(Self::container(db, container)?.get(key).cloned()))
    }

    async fn delete(&self, container: &str, key: &str) -> StorageResult<()> {
        self.with_db(|db| {
            Self::container(db, container)?.remove(key);
            Ok(())
        })
    }

    async fn clear(&self, container: &str) -> StorageResult<()> {
        self.with_db(|db| {
            Self::container(db, container)?.clear();
            Ok(())
        })
    }

    async fn get_all(&self, container: &str) -> StorageResult<Vec<Value>> {
        self.with_db(|db| {
            Ok(Self::container(db, container)?.values().cloned().collect())
        })
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_create_applies_upgrade() {
        let backend = MemoryDocumentBackend::new();
        let conn = backend
            .open("db", None, &SchemaUpgrade::create(["a", "b"]))
            .await
            .unwrap();
        assert_eq!(conn.version(), 1);
        assert_eq!(conn.container_names(), vec!["a", "b"]);
        assert_eq!(backend.stored_version("db"), Some(1));
    }

    #[tokio::test]
    async fn test_same_version_skips_upgrade() {
        let backend = MemoryDocumentBackend::new();
        backend
            .open("db", Some(1), &SchemaUpgrade::create(["a"]))
            .await
            .unwrap();
        let conn = backend
            .open("db", Some(1), &SchemaUpgrade::create(["b"]))
            .await
            .unwrap();
        assert_eq!(conn.container_names(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_lower_version_conflicts() {
        let backend = MemoryDocumentBackend::new();
        backend
            .open("db", Some(3), &SchemaUpgrade::default())
            .await
            .unwrap();
        let err = backend
            .open("db", Some(2), &SchemaUpgrade::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            StorageError::VersionConflict {
                requested: 2,
                current: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_upgrade_makes_old_connections_stale() {
        let backend = MemoryDocumentBackend::new();
        let old = backend
            .open("db", Some(1), &SchemaUpgrade::create(["a"]))
            .await
            .unwrap();
        old.put("a", "k", json!(1)).await.unwrap();

        let new = backend
            .open("db", Some(2), &SchemaUpgrade::delete(["a"]))
            .await
            .unwrap();
        assert!(new.container_names().is_empty());
        assert!(old.get("a", "k").await.unwrap_err().is_stale_connection());
    }

    #[tokio::test]
    async fn test_closed_connection_is_stale() {
        let backend = MemoryDocumentBackend::new();
        let conn = backend
            .open("db", None, &SchemaUpgrade::create(["a"]))
            .await
            .unwrap();
        conn.close();
        assert!(conn.put("a", "k", json!(1)).await.unwrap_err().is_stale_connection());
    }

    #[tokio::test]
    async fn test_unknown_container() {
        let backend = MemoryDocumentBackend::new();
        let conn = backend
            .open("db", None, &SchemaUpgrade::default())
            .await
            .unwrap();
        assert!(matches!(
            conn.get("nope", "k").await,
            Err(StorageError::UnknownContainer(_))
        ));
    }

    #[tokio::test]
    async fn test_invalidate_connections() {
        let backend = MemoryDocumentBackend::new();
        let conn = backend
            .open("db", None, &SchemaUpgrade::create(["a"]))
            .await
            .unwrap();
        backend.invalidate_connections("db");
        assert!(conn.get_all("a").await.unwrap_err().is_stale_connection());
        assert_eq!(backend.stored_version("db"), Some(1));
    }
}
