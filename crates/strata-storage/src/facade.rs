//! Unified facade over the memory tier, the tiering engine and the document
//! store.
//!
//! [`Strata`] is what applications hold. It never returns an error from a
//! data operation: every failure is logged, reported to the event sink and
//! degraded to a neutral value.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::bounded::{MemorySyncStorage, SyncBoundedStore, SyncStorage};
use crate::budget::SizeBudget;
use crate::capability::{CapabilityProbe, HostCapabilities};
use crate::document::{
    AsyncDocumentStore, DEFAULT_DATABASE_NAME, DEFAULT_SCHEMA_VERSION, DocumentBackend,
    MemoryDocumentBackend,
};
use crate::error::StorageResult;
use crate::events::{SharedSink, StorageEvent, Tier, null_sink};
use crate::memory::MemoryStore;
use crate::tiered::{EngineTiers, SizeCheck, TieredCacheEngine};

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for [`Strata`].
///
/// The capability probe is consulted once, in [`build`](Self::build). Tiers
/// without an explicit backend get in-process defaults.
#[must_use]
pub struct StrataBuilder {
    budget: SizeBudget,
    probe: Box<dyn CapabilityProbe>,
    sync_storage: Option<Arc<dyn SyncStorage>>,
    fallback_storage: Option<Arc<dyn SyncStorage>>,
    document_backend: Option<Arc<dyn DocumentBackend>>,
    database_name: String,
    database_version: u32,
    sink: SharedSink,
}

impl std::fmt::Debug for StrataBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrataBuilder")
            .field("budget", &self.budget)
            .field("database_name", &self.database_name)
            .field("database_version", &self.database_version)
            .finish_non_exhaustive()
    }
}

impl Default for StrataBuilder {
    fn default() -> Self {
        Self {
            budget: SizeBudget::default(),
            probe: Box::new(HostCapabilities::default()),
            sync_storage: None,
            fallback_storage: None,
            document_backend: None,
            database_name: DEFAULT_DATABASE_NAME.to_owned(),
            database_version: DEFAULT_SCHEMA_VERSION,
            sink: null_sink(),
        }
    }
}

impl StrataBuilder {
    /// Start with default budget, capabilities and in-process backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size budget.
    pub fn budget(mut self, budget: SizeBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Set the capability probe.
    pub fn capabilities(mut self, probe: impl CapabilityProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Storage for the primary synchronous tier.
    pub fn sync_storage(mut self, storage: Arc<dyn SyncStorage>) -> Self {
        self.sync_storage = Some(storage);
        self
    }

    /// Storage for the fallback tier.
    pub fn fallback_storage(mut self, storage: Arc<dyn SyncStorage>) -> Self {
        self.fallback_storage = Some(storage);
        self
    }

    /// Backend for the document tier.
    pub fn document_backend(mut self, backend: Arc<dyn DocumentBackend>) -> Self {
        self.document_backend = Some(backend);
        self
    }

    /// Database name and first-open schema version for the document tier.
    pub fn database(mut self, name: impl Into<String>, version: u32) -> Self {
        self.database_name = name.into();
        self.database_version = version;
        self
    }

    /// Route diagnostics from every tier to `sink`.
    pub fn sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Wire the tiers the probe reports as available.
    #[must_use]
    pub fn build(self) -> Strata {
        let async_store = self.probe.is_async_store_supported();
        let sync_store = self.probe.is_sync_store_supported();
        let unbounded_host = self.probe.is_unbounded_host_platform();
        info!(async_store, sync_store, unbounded_host, "building storage tiers");

        let budget = self.budget;
        let fallback_storage = self
            .fallback_storage
            .unwrap_or_else(|| Arc::new(MemorySyncStorage::new()));
        let mut tiers = EngineTiers::new(
            SyncBoundedStore::fallback(fallback_storage, &budget).with_sink(self.sink.clone()),
        )
        .with_unbounded_host(unbounded_host);

        if sync_store {
            let storage = self
                .sync_storage
                .unwrap_or_else(|| Arc::new(MemorySyncStorage::new()));
            tiers = tiers
                .with_sync(SyncBoundedStore::new(storage, &budget).with_sink(self.sink.clone()));
        }

        if async_store {
            let backend = self
                .document_backend
                .unwrap_or_else(|| Arc::new(MemoryDocumentBackend::new()));
            let document = AsyncDocumentStore::new(backend, self.database_name)
                .with_version(self.database_version)
                .with_sink(self.sink.clone());
            tiers = tiers.with_document(Arc::new(document));
        }

        Strata {
            memory: MemoryStore::new(&budget).with_sink(self.sink.clone()),
            cache: TieredCacheEngine::new(tiers, budget).with_sink(self.sink.clone()),
            sink: self.sink,
        }
    }
}

// ---------------------------------------------------------------------------
// Facade
// ---------------------------------------------------------------------------

/// Tiered key/value persistence behind one interface.
///
/// Three method families:
///
/// - `*_memory_data`: the process-local map.
/// - `*_cache_data`: the tiering engine; values land in the synchronous tier
///   or are upgraded to the document store by size.
/// - `*_db_data` and container management: the document store directly.
///   Without a document store the data methods redirect to the cache family
///   and the rest do nothing.
///
/// # Example
///
/// ```rust,ignore
/// use strata_storage::Strata;
/// use serde_json::json;
///
/// let strata = Strata::builder().build();
/// strata.set_cache_data("profile", json!({"name": "ada"})).await;
/// let profile = strata.get_cache_data("profile").await;
/// ```
pub struct Strata {
    memory: MemoryStore,
    cache: TieredCacheEngine,
    sink: SharedSink,
}

impl std::fmt::Debug for Strata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strata")
            .field("memory", &self.memory)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Default for Strata {
    fn default() -> Self {
        StrataBuilder::default().build()
    }
}

impl Strata {
    /// Start building a facade.
    pub fn builder() -> StrataBuilder {
        StrataBuilder::new()
    }

    /// Build from a configuration section.
    ///
    /// A configured `sync_path` backs the primary tier with a
    /// [`FileSyncStorage`](crate::bounded::FileSyncStorage); with the `kv`
    /// feature, a configured `document_path` backs the document tier with
    /// SurrealKV.
    ///
    /// # Errors
    ///
    /// Returns the storage error if a configured file or directory cannot be
    /// opened.
    #[cfg(feature = "config")]
    pub fn from_config(section: &strata_config::StorageSection) -> StorageResult<Self> {
        let caps = HostCapabilities::default()
            .with_async_store(section.async_store)
            .with_sync_store(section.sync_store)
            .with_unbounded_host(section.unbounded_host);

        let mut builder = Self::builder()
            .budget(SizeBudget::from(section))
            .capabilities(caps)
            .database(section.database_name.clone(), section.database_version);

        if let Some(path) = &section.sync_path {
            let storage = crate::bounded::FileSyncStorage::open(path)?;
            builder = builder.sync_storage(Arc::new(storage));
        }

        #[cfg(feature = "kv")]
        if let Some(path) = &section.document_path {
            let backend = crate::document::SurrealKvDocumentBackend::open(path)?;
            builder = builder.document_backend(Arc::new(backend));
        }

        Ok(builder.build())
    }

    /// The memory tier.
    #[must_use]
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// The tiering engine.
    #[must_use]
    pub fn cache(&self) -> &TieredCacheEngine {
        &self.cache
    }

    /// Whether the document tier is wired.
    #[must_use]
    pub fn has_document_store(&self) -> bool {
        self.cache.document().is_some()
    }

    fn degrade<T>(&self, operation: &'static str, result: StorageResult<T>, neutral: T) -> T {
        match result {
            Ok(value) => value,
            Err(e) => {
                error!(operation, error = %e, "document store call failed");
                self.sink.emit(&StorageEvent::BackendFailure {
                    tier: Tier::Document,
                    operation,
                    error: e.to_string(),
                });
                neutral
            },
        }
    }

    // -- Memory family --

    /// Store `value` in memory.
    pub fn set_memory_data(&self, key: &str, value: Value) {
        self.memory.set(key, value);
    }

    /// Get a value from memory.
    #[must_use]
    pub fn get_memory_data(&self, key: &str) -> Option<Value> {
        self.memory.get(key)
    }

    /// Remove a value from memory.
    pub fn remove_memory_data(&self, key: &str) {
        self.memory.remove(key);
    }

    /// Clear memory.
    pub fn clear_memory_data(&self) {
        self.memory.clear();
    }

    /// Read a value from memory and remove it.
    pub fn get_once_memory_data(&self, key: &str) -> Option<Value> {
        self.memory.get_once(key)
    }

    /// Snapshot of memory.
    #[must_use]
    pub fn get_memory_data_info(&self) -> HashMap<String, Value> {
        self.memory.get_all()
    }

    // -- Cache family --

    /// Store `value`, letting the engine pick the tier.
    pub async fn set_cache_data(&self, key: &str, value: Value) {
        self.cache.set_cache_data(key, value).await;
    }

    /// Resolve `key` across tiers, or `{}` if absent.
    pub async fn get_cache_data(&self, key: &str) -> Value {
        self.cache.get_cache_data(key).await
    }

    /// Read `key`, then remove it.
    pub async fn get_once_cache_data(&self, key: &str) -> Value {
        self.cache.get_once_cache_data(key).await
    }

    /// Remove `key` from the first tier holding it.
    pub async fn remove_cache_data(&self, key: &str) {
        self.cache.remove_cache_data(key).await;
    }

    /// Wipe the synchronous cache tier.
    pub fn clear_cache_data(&self) {
        self.cache.clear_cache_data();
    }

    /// Whether the synchronous tiers are over their ceilings.
    #[must_use]
    pub fn check_cache_data_size(&self) -> SizeCheck {
        self.cache.check_cache_data_size()
    }

    /// Every synchronous-tier key with its resolved value.
    pub async fn get_cache_data_info(&self) -> BTreeMap<String, Value> {
        self.cache.get_cache_data_info().await
    }

    // -- Durable-store family --

    /// Open the document store. Returns whether a connection is held.
    pub async fn open_db(&self) -> bool {
        let Some(document) = self.cache.document() else {
            debug!("no document store, open_db skipped");
            return false;
        };
        self.degrade("open", document.open().await.map(|_| true), false)
    }

    /// Close the document store.
    pub async fn close_db(&self) {
        if let Some(document) = self.cache.document() {
            document.close().await;
        }
    }

    /// Clear every container of the document store.
    pub async fn clear_db(&self) {
        if let Some(document) = self.cache.document() {
            self.degrade("clear_all", document.clear_all().await, ());
        }
    }

    /// Create a container. Returns whether the schema changed.
    pub async fn create_object_store(&self, name: &str) -> bool {
        match self.cache.document() {
            Some(document) => {
                self.degrade("create_container", document.create_container(name).await, false)
            },
            None => false,
        }
    }

    /// Drop a container. Returns whether the schema changed.
    pub async fn delete_object_store(&self, name: &str) -> bool {
        match self.cache.document() {
            Some(document) => {
                self.degrade("delete_container", document.delete_container(name).await, false)
            },
            None => false,
        }
    }

    /// Write `value` under `key` in `container`, or to the cache when there
    /// is no document store.
    pub async fn set_db_data(&self, container: &str, key: &str, value: Value) {
        match self.cache.document() {
            Some(document) => {
                self.degrade("write", document.write(container, key, value).await, ());
            },
            None => self.cache.set_cache_data(key, value).await,
        }
    }

    /// Read `key` from `container`, or from the cache when there is no
    /// document store.
    pub async fn get_db_data(&self, container: &str, key: &str) -> Option<Value> {
        match self.cache.document() {
            Some(document) => self.degrade("read", document.read(container, key).await, None),
            None => self.cache.find_cache_data(key).await,
        }
    }

    /// Delete `key` from `container`, or from the cache when there is no
    /// document store.
    pub async fn remove_db_data(&self, container: &str, key: &str) {
        match self.cache.document() {
            Some(document) => {
                self.degrade("delete", document.delete(container, key).await, ());
            },
            None => self.cache.remove_cache_data(key).await,
        }
    }

    /// Delete every key in `container`.
    pub async fn clear_db_data(&self, container: &str) {
        if let Some(document) = self.cache.document() {
            self.degrade("clear", document.clear(container).await, ());
        }
    }

    /// Every value in `container`.
    pub async fn get_db_data_info(&self, container: &str) -> Vec<Value> {
        match self.cache.document() {
            Some(document) => {
                self.degrade("list_all", document.list_all(container).await, Vec::new())
            },
            None => Vec::new(),
        }
    }
}
