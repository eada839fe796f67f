//! Synchronous bounded tier.
//!
//! [`SyncStorage`] is the string-keyed, string-valued capability a host
//! provides (a web-style local store, a preferences file, ...).
//! [`SyncBoundedStore`] layers JSON encoding and size accounting on top of it.
//!
//! The ceiling is advisory input for the tiering engine: the store measures
//! itself but never refuses a write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde_json::Value;
use tracing::{debug, warn};

use crate::budget::SizeBudget;
use crate::error::{StorageError, StorageResult};
use crate::estimate::estimate_bytes;
use crate::events::{SharedSink, StorageEvent, Tier, null_sink};

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Synchronous string-keyed storage capability.
pub trait SyncStorage: Send + Sync {
    /// Store `value` under `key`, overwriting any existing value.
    fn set_item(&self, key: &str, value: String) -> StorageResult<()>;

    /// Get the string under `key`, or `None` if absent.
    fn get_item(&self, key: &str) -> StorageResult<Option<String>>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove_item(&self, key: &str) -> StorageResult<()>;

    /// Remove every key.
    fn clear(&self) -> StorageResult<()>;

    /// List every stored key.
    fn list_keys(&self) -> StorageResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// In-memory capability
// ---------------------------------------------------------------------------

/// Process-local [`SyncStorage`]. Used as the final fallback and in tests.
#[derive(Debug, Default)]
pub struct MemorySyncStorage {
    items: RwLock<BTreeMap<String, String>>,
}

impl MemorySyncStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStorage for MemorySyncStorage {
    fn set_item(&self, key: &str, value: String) -> StorageResult<()> {
        let mut items = self
            .items
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        items.insert(key.to_owned(), value);
        Ok(())
    }

    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let items = self
            .items
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(items.get(key).cloned())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        let mut items = self
            .items
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        items.remove(key);
        Ok(())
    }

    fn clear(&self) -> StorageResult<()> {
        let mut items = self
            .items
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        items.clear();
        Ok(())
    }

    fn list_keys(&self) -> StorageResult<Vec<String>> {
        let items = self
            .items
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(items.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// File-backed capability
// ---------------------------------------------------------------------------

/// [`SyncStorage`] persisted as a single JSON object file.
///
/// The whole map is kept in memory and rewritten on every mutation through a
/// temporary file and a rename, so a crash leaves either the old or the new
/// file on disk.
#[derive(Debug)]
pub struct FileSyncStorage {
    path: PathBuf,
    items: RwLock<BTreeMap<String, String>>,
}

impl FileSyncStorage {
    /// Open the store at `path`, loading existing contents if the file exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connection`] if the file exists but cannot be
    /// read, or [`StorageError::Serialization`] if it is not a JSON object of
    /// strings.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let items = match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => BTreeMap::new(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "sync store file not found, starting empty");
                BTreeMap::new()
            },
            Err(e) => return Err(StorageError::Connection(e.to_string())),
        };
        Ok(Self {
            path,
            items: RwLock::new(items),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> StorageResult<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Internal(e.to_string()))?;
        }
        let encoded = serde_json::to_vec(items)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, encoded).map_err(|e| StorageError::Internal(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StorageError::Internal(e.to_string()))
    }

    fn mutate(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) -> StorageResult<()> {
        let mut items = self
            .items
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        // Memory only moves once the file does.
        let mut next = items.clone();
        f(&mut next);
        self.persist(&next)?;
        *items = next;
        Ok(())
    }
}

impl SyncStorage for FileSyncStorage {
    fn set_item(&self, key: &str, value: String) -> StorageResult<()> {
        self.mutate(|items| {
            items.insert(key.to_owned(), value);
        })
    }

    fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let items = self
            .items
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(items.get(key).cloned())
    }

    fn remove_item(&self, key: &str) -> StorageResult<()> {
        self.mutate(|items| {
            items.remove(key);
        })
    }

    fn clear(&self) -> StorageResult<()> {
        self.mutate(BTreeMap::clear)
    }

    fn list_keys(&self) -> StorageResult<Vec<String>> {
        let items = self
            .items
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(items.keys().cloned().collect())
    }
}

// ---------------------------------------------------------------------------
// Bounded store
// ---------------------------------------------------------------------------

/// JSON-encoding, size-accounting wrapper over a [`SyncStorage`].
#[derive(Clone)]
pub struct SyncBoundedStore {
    storage: Arc<dyn SyncStorage>,
    ceiling: usize,
    tier: Tier,
    sink: SharedSink,
}

impl std::fmt::Debug for SyncBoundedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncBoundedStore")
            .field("tier", &self.tier)
            .field("ceiling", &self.ceiling)
            .finish_non_exhaustive()
    }
}

impl SyncBoundedStore {
    /// Wrap `storage` as the primary synchronous tier.
    #[must_use]
    pub fn new(storage: Arc<dyn SyncStorage>, budget: &SizeBudget) -> Self {
        Self {
            storage,
            ceiling: budget.sync_ceiling,
            tier: Tier::Sync,
            sink: null_sink(),
        }
    }

    /// Wrap `storage` as the final fallback tier.
    #[must_use]
    pub fn fallback(storage: Arc<dyn SyncStorage>, budget: &SizeBudget) -> Self {
        Self {
            tier: Tier::Fallback,
            ..Self::new(storage, budget)
        }
    }

    /// Route diagnostics to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Which tier this store plays.
    #[must_use]
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Configured aggregate ceiling.
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Serialize `value` and store it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the value cannot be encoded,
    /// or the capability's error if the write fails.
    pub fn set(&self, key: &str, value: &Value) -> StorageResult<()> {
        let serialized = serde_json::to_string(value)?;
        self.set_raw(key, serialized)
    }

    /// Store an already-serialized value.
    ///
    /// # Errors
    ///
    /// Returns the capability's error if the write fails.
    pub fn set_raw(&self, key: &str, serialized: String) -> StorageResult<()> {
        self.storage.set_item(key, serialized)
    }

    /// Get the raw stored string under `key`.
    ///
    /// # Errors
    ///
    /// Returns the capability's error if the read fails.
    pub fn get_raw(&self, key: &str) -> StorageResult<Option<String>> {
        self.storage.get_item(key)
    }

    /// Get and parse the value under `key`.
    ///
    /// A stored string that is not valid JSON is logged and reported as
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns the capability's error if the read fails.
    pub fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let Some(raw) = self.storage.get_item(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(tier = %self.tier, key, error = %e, "stored value is not valid JSON");
                self.sink.emit(&StorageEvent::SerializationFailure {
                    key: key.to_owned(),
                    error: e.to_string(),
                });
                Ok(None)
            },
        }
    }

    /// Whether a value is stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns the capability's error if the read fails.
    pub fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.storage.get_item(key)?.is_some())
    }

    /// Remove `key`.
    ///
    /// # Errors
    ///
    /// Returns the capability's error if the removal fails.
    pub fn remove(&self, key: &str) -> StorageResult<()> {
        self.storage.remove_item(key)
    }

    /// Remove every key.
    ///
    /// # Errors
    ///
    /// Returns the capability's error if the clear fails.
    pub fn clear(&self) -> StorageResult<()> {
        self.storage.clear()
    }

    /// Every stored key.
    ///
    /// # Errors
    ///
    /// Returns the capability's error if listing fails.
    pub fn keys(&self) -> StorageResult<Vec<String>> {
        self.storage.list_keys()
    }

    /// Every stored entry, parsed. Unparseable entries are skipped.
    ///
    /// # Errors
    ///
    /// Returns the capability's error if listing or reading fails.
    pub fn get_all(&self) -> StorageResult<BTreeMap<String, Value>> {
        let mut all = BTreeMap::new();
        for key in self.keys()? {
            if let Some(value) = self.get(&key)? {
                all.insert(key, value);
            }
        }
        Ok(all)
    }

    /// Sum of the estimated sizes of every stored value string.
    ///
    /// # Errors
    ///
    /// Returns the capability's error if listing or reading fails.
    pub fn aggregate_bytes(&self) -> StorageResult<usize> {
        let mut total: usize = 0;
        for key in self.keys()? {
            if let Some(raw) = self.storage.get_item(&key)? {
                total = total.saturating_add(estimate_bytes(&raw));
            }
        }
        Ok(total)
    }

    /// Whether current usage exceeds the ceiling.
    ///
    /// # Errors
    ///
    /// Returns the capability's error if measuring fails.
    pub fn check_capacity(&self) -> StorageResult<bool> {
        self.check_capacity_for(0)
    }

    /// Whether current usage plus an `incoming` write would exceed the
    /// ceiling.
    ///
    /// # Errors
    ///
    /// Returns the capability's error if measuring fails.
    pub fn check_capacity_for(&self, incoming: usize) -> StorageResult<bool> {
        let bytes = self.aggregate_bytes()?.saturating_add(incoming);
        if bytes > self.ceiling {
            warn!(
                tier = %self.tier,
                bytes,
                ceiling = self.ceiling,
                "cache data size exceeded; consider removing unused data"
            );
            self.sink.emit(&StorageEvent::SyncCeilingExceeded {
                tier: self.tier,
                bytes,
                ceiling: self.ceiling,
            });
            return Ok(true);
        }
        Ok(false)
    }
}
