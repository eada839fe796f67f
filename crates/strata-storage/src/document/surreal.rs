//! Persistent [`DocumentBackend`] on a `SurrealKV` tree.
//!
//! Key layout inside the tree:
//!
//! - schema record: `"{database}\x01schema"` holding `{version, containers}`
//! - documents: `"{database}\0{container}\0{key}"` holding JSON bytes
//!
//! Database and container names must be non-empty and free of NUL bytes, so
//! no document key can alias the schema record or another container.
//!
//! Generations are tracked in process: opening at a higher version makes
//! this backend's older connections stale. Other processes sharing the same
//! directory are not observed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DocumentBackend, DocumentConnection, SchemaUpgrade};
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Schema {
    version: u32,
    containers: Vec<String>,
}

impl Schema {
    fn apply(&mut self, upgrade: &SchemaUpgrade) {
        self.containers.retain(|c| !upgrade.delete.contains(c));
        for name in &upgrade.create {
            if !self.containers.contains(name) {
                self.containers.push(name.clone());
            }
        }
        self.containers.sort();
    }
}

fn map_kv_err(e: &surrealkv::Error) -> StorageError {
    StorageError::Internal(e.to_string())
}

/// Reject names that would break the key layout.
fn validate_name(kind: &str, name: &str) -> StorageResult<()> {
    if name.is_empty() {
        return Err(StorageError::InvalidKey(format!("{kind} name is empty")));
    }
    if name.contains('\0') {
        return Err(StorageError::InvalidKey(format!(
            "{kind} name {name:?} contains a NUL byte"
        )));
    }
    Ok(())
}

fn schema_key(database: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(database.len().saturating_add(7));
    buf.extend_from_slice(database.as_bytes());
    buf.extend_from_slice(b"\x01schema");
    buf
}

/// `"{database}\0{container}\0"`, the inclusive start of a container range.
fn container_prefix(database: &str, container: &str) -> Vec<u8> {
    let capacity = database
        .len()
        .saturating_add(container.len())
        .saturating_add(2);
    let mut buf = Vec::with_capacity(capacity);
    buf.extend_from_slice(database.as_bytes());
    buf.push(0);
    buf.extend_from_slice(container.as_bytes());
    buf.push(0);
    buf
}

/// `"{database}\0{container}\x01"`, the exclusive end of a container range.
fn container_range_end(database: &str, container: &str) -> Vec<u8> {
    let mut buf = container_prefix(database, container);
    buf.pop();
    buf.push(1);
    buf
}

fn document_key(database: &str, container: &str, key: &str) -> Vec<u8> {
    let mut buf = container_prefix(database, container);
    buf.extend_from_slice(key.as_bytes());
    buf
}

type Generations = Arc<Mutex<HashMap<String, u64>>>;

/// Document backend persisted in a `SurrealKV` directory.
///
/// # Example
///
/// ```rust,ignore
/// use strata_storage::document::{AsyncDocumentStore, SurrealKvDocumentBackend};
/// use std::sync::Arc;
///
/// let backend = Arc::new(SurrealKvDocumentBackend::open("./data/docs")?);
/// let store = AsyncDocumentStore::new(backend, "app");
/// ```
pub struct SurrealKvDocumentBackend {
    tree: Arc<surrealkv::Tree>,
    generations: Generations,
}

impl std::fmt::Debug for SurrealKvDocumentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurrealKvDocumentBackend").finish_non_exhaustive()
    }
}

impl SurrealKvDocumentBackend {
    /// Open a persistent backend at the given directory path.
    ///
    /// Creates the directory if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the tree cannot be opened.
    pub fn open(path: impl AsRef<std::path::Path>) -> StorageResult<Self> {
        let tree = surrealkv::TreeBuilder::new()
            .with_path(path.as_ref().to_path_buf())
            .build()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(Self {
            tree: Arc::new(tree),
            generations: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Close the tree, flushing pending writes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Internal`] if the flush fails.
    pub async fn close(&self) -> StorageResult<()> {
        self.tree
            .close()
            .await
            .map_err(|e| StorageError::Internal(e.to_string()))
    }

    fn read_schema(&self, database: &str) -> StorageResult<Option<Schema>> {
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        tx.get(&schema_key(database))
            .map_err(|ref e| map_kv_err(e))?
            .map(|raw| serde_json::from_slice(&raw).map_err(StorageError::from))
            .transpose()
    }

    async fn write_schema(
        &self,
        database: &str,
        schema: &Schema,
        dropped: &[String],
    ) -> StorageResult<()> {
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        for container in dropped {
            let keys = {
                let start = container_prefix(database, container);
                let end = container_range_end(database, container);
                let mut iter = tx.range(&start, &end).map_err(|ref e| map_kv_err(e))?;
                iter.seek_first().map_err(|ref e| map_kv_err(e))?;
                let mut keys = Vec::new();
                while iter.valid() {
                    keys.push(iter.key());
                    iter.next().map_err(|ref e| map_kv_err(e))?;
                }
                keys
            };
            for key in &keys {
                tx.delete(key).map_err(|ref e| map_kv_err(e))?;
            }
        }
        let raw = serde_json::to_vec(schema)?;
        tx.set(&schema_key(database), &raw)
            .map_err(|ref e| map_kv_err(e))?;
        tx.commit().await.map_err(|ref e| map_kv_err(e))
    }

    fn bump_generation(&self, database: &str) -> StorageResult<u64> {
        let mut generations = self
            .generations
            .lock()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let generation = generations.entry(database.to_owned()).or_insert(0);
        *generation = generation.saturating_add(1);
        Ok(*generation)
    }

    fn current_generation(&self, database: &str) -> StorageResult<u64> {
        let mut generations = self
            .generations
            .lock()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(*generations.entry(database.to_owned()).or_insert(1))
    }
}

#[async_trait]
impl DocumentBackend for SurrealKvDocumentBackend {
    async fn open(
        &self,
        name: &str,
        version: Option<u32>,
        upgrade: &SchemaUpgrade,
    ) -> StorageResult<Arc<dyn DocumentConnection>> {
        validate_name("database", name)?;
        for container in &upgrade.create {
            validate_name("container", container)?;
        }

        let (schema, generation) = match self.read_schema(name)? {
            Some(mut schema) => match version {
                Some(requested) if requested < schema.version => {
                    return Err(StorageError::VersionConflict {
                        requested,
                        current: schema.version,
                    });
                },
                Some(requested) if requested > schema.version => {
                    let dropped: Vec<String> = upgrade
                        .delete
                        .iter()
                        .filter(|c| schema.containers.contains(c))
                        .cloned()
                        .collect();
                    schema.apply(upgrade);
                    schema.version = requested;
                    self.write_schema(name, &schema, &dropped).await?;
                    (schema, self.bump_generation(name)?)
                },
                _ => (schema, self.current_generation(name)?),
            },
            None => {
                let mut schema = Schema {
                    version: version.unwrap_or(1).max(1),
                    containers: Vec::new(),
                };
                schema.apply(upgrade);
                self.write_schema(name, &schema, &[]).await?;
                (schema, self.bump_generation(name)?)
            },
        };

        Ok(Arc::new(SurrealKvConnection {
            tree: Arc::clone(&self.tree),
            generations: Arc::clone(&self.generations),
            database: name.to_owned(),
            schema,
            generation,
            closed: AtomicBool::new(false),
        }))
    }
}

struct SurrealKvConnection {
    tree: Arc<surrealkv::Tree>,
    generations: Generations,
    database: String,
    schema: Schema,
    generation: u64,
    closed: AtomicBool,
}

impl SurrealKvConnection {
    fn ensure_current(&self, container: &str) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::StaleConnection(format!(
                "connection to {} is closed",
                self.database
            )));
        }
        let live = self
            .generations
            .lock()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(&self.database)
            .copied();
        if live != Some(self.generation) {
            return Err(StorageError::StaleConnection(format!(
                "{} changed version",
                self.database
            )));
        }
        if !self.schema.containers.iter().any(|c| c == container) {
            return Err(StorageError::UnknownContainer(container.to_owned()));
        }
        Ok(())
    }

    fn collect_keys(&self, container: &str) -> StorageResult<Vec<Vec<u8>>> {
        let start = container_prefix(&self.database, container);
        let end = container_range_end(&self.database, container);
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let mut iter = tx.range(&start, &end).map_err(|ref e| map_kv_err(e))?;
        iter.seek_first().map_err(|ref e| map_kv_err(e))?;
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next().map_err(|ref e| map_kv_err(e))?;
        }
        Ok(keys)
    }
}

#[async_trait]
impl DocumentConnection for SurrealKvConnection {
    fn version(&self) -> u32 {
        self.schema.version
    }

    fn container_names(&self) -> Vec<String> {
        self.schema.containers.clone()
    }

    async fn put(&self, container: &str, key: &str, value: Value) -> StorageResult<()> {
        self.ensure_current(container)?;
        let raw = serde_json::to_vec(&value)?;
        let dk = document_key(&self.database, container, key);
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        tx.set(&dk, &raw).map_err(|ref e| map_kv_err(e))?;
        tx.commit().await.map_err(|ref e| map_kv_err(e))
    }

    async fn get(&self, container: &str, key: &str) -> StorageResult<Option<Value>> {
        self.ensure_current(container)?;
        let dk = document_key(&self.database, container, key);
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        tx.get(&dk)
            .map_err(|ref e| map_kv_err(e))?
            .map(|raw| serde_json::from_slice(&raw).map_err(StorageError::from))
            .transpose()
    }

    async fn delete(&self, container: &str, key: &str) -> StorageResult<()> {
        self.ensure_current(container)?;
        let dk = document_key(&self.database, container, key);
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        if tx.get(&dk).map_err(|ref e| map_kv_err(e))?.is_some() {
            tx.delete(&dk).map_err(|ref e| map_kv_err(e))?;
            tx.commit().await.map_err(|ref e| map_kv_err(e))?;
        }
        Ok(())
    }

    async fn clear(&self, container: &str) -> StorageResult<()> {
        self.ensure_current(container)?;
        let keys = self.collect_keys(container)?;
        if keys.is_empty() {
            return Ok(());
        }
        let mut tx = self.tree.begin().map_err(|ref e| map_kv_err(e))?;
        for key in &keys {
            tx.delete(key).map_err(|ref e| map_kv_err(e))?;
        }
        tx.commit().await.map_err(|ref e| map_kv_err(e))
    }

    async fn get_all(&self, container: &str) -> StorageResult<Vec<Value>> {
        self.ensure_current(container)?;
        let keys = self.collect_keys(container)?;
        let tx = self
            .tree
            .begin_with_mode(surrealkv::Mode::ReadOnly)
            .map_err(|ref e| map_kv_err(e))?;
        let mut values = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(raw) = tx.get(key).map_err(|ref e| map_kv_err(e))? {
                values.push(serde_json::from_slice(&raw)?);
            }
        }
        Ok(values)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::{AsyncDocumentStore, GLOBAL_CONTAINER};

    #[tokio::test]
    async fn test_schema_and_documents_persist() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = Arc::new(SurrealKvDocumentBackend::open(dir.path()).unwrap());
            let store = AsyncDocumentStore::new(backend.clone(), "app");
            store.create_container("drafts").await.unwrap();
            store.write("drafts", "d1", json!({"body": "hello"})).await.unwrap();
            store.write(GLOBAL_CONTAINER, "g", json!(7)).await.unwrap();
            store.close().await;
            backend.close().await.unwrap();
        }

        let backend = Arc::new(SurrealKvDocumentBackend::open(dir.path()).unwrap());
        let store = AsyncDocumentStore::new(backend, "app");
        assert_eq!(
            store.read("drafts", "d1").await.unwrap(),
            Some(json!({"body": "hello"}))
        );
        assert_eq!(store.open().await.unwrap().version(), 2);
        assert_eq!(store.list_all(GLOBAL_CONTAINER).await.unwrap(), vec![json!(7)]);
    }

    #[tokio::test]
    async fn test_delete_container_drops_documents() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SurrealKvDocumentBackend::open(dir.path()).unwrap());
        let store = AsyncDocumentStore::new(backend, "app");
        store.create_container("tmp").await.unwrap();
        store.write("tmp", "k", json!(1)).await.unwrap();

        store.delete_container("tmp").await.unwrap();
        store.create_container("tmp").await.unwrap();
        assert!(store.list_all("tmp").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_document_named_schema_leaves_schema_record_alone() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = Arc::new(SurrealKvDocumentBackend::open(dir.path()).unwrap());
            let store = AsyncDocumentStore::new(backend.clone(), "app");
            store.create_container("c").await.unwrap();
            store.write("c", "schema", json!("oops")).await.unwrap();
            store.write(GLOBAL_CONTAINER, "schema", json!("oops")).await.unwrap();
            store.clear("c").await.unwrap();
            store.close().await;
            backend.close().await.unwrap();
        }

        let backend = SurrealKvDocumentBackend::open(dir.path()).unwrap();
        let conn = backend
            .open("app", None, &SchemaUpgrade::default())
            .await
            .unwrap();
        assert_eq!(conn.version(), 2);
        assert_eq!(conn.container_names(), vec!["c", GLOBAL_CONTAINER]);
        assert_eq!(
            conn.get(GLOBAL_CONTAINER, "schema").await.unwrap(),
            Some(json!("oops"))
        );
    }

    #[tokio::test]
    async fn test_names_that_break_the_key_layout_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(SurrealKvDocumentBackend::open(dir.path()).unwrap());

        let empty = backend.open("app", Some(1), &SchemaUpgrade::create([""])).await;
        assert!(matches!(empty, Err(StorageError::InvalidKey(_))));
        let nul = backend
            .open("app", Some(1), &SchemaUpgrade::create(["a\0b"]))
            .await;
        assert!(matches!(nul, Err(StorageError::InvalidKey(_))));
        let database = backend.open("a\0b", None, &SchemaUpgrade::default()).await;
        assert!(matches!(database, Err(StorageError::InvalidKey(_))));

        let store = AsyncDocumentStore::new(backend, "app");
        assert!(matches!(
            store.create_container("").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert_eq!(store.container_names().await.unwrap(), vec![GLOBAL_CONTAINER]);
    }

    #[tokio::test]
    async fn test_upgrade_stales_old_connection() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SurrealKvDocumentBackend::open(dir.path()).unwrap();
        let old = backend
            .open("app", Some(1), &SchemaUpgrade::create(["a"]))
            .await
            .unwrap();
        backend
            .open("app", Some(2), &SchemaUpgrade::create(["b"]))
            .await
            .unwrap();
        assert!(old.get("a", "k").await.unwrap_err().is_stale_connection());
    }
}
