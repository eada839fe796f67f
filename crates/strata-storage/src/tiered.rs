//! Tiering and fallback decision engine.
//!
//! [`TieredCacheEngine`] decides, per write, whether a value stays in the
//! synchronous bounded tier or is promoted to the document tier, and resolves
//! reads and removals across tiers in a fixed order. Promoted values are
//! wrapped in an [`UpgradedEntry`] so a later read can tell them apart from
//! ordinary documents sharing the [`GLOBAL_CONTAINER`].
//!
//! Every public operation is fail-soft: backend and serialization failures
//! are logged, reported to the event sink, and resolved to neutral values.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::bounded::SyncBoundedStore;
use crate::budget::SizeBudget;
use crate::document::{AsyncDocumentStore, GLOBAL_CONTAINER};
use crate::error::{StorageError, StorageResult};
use crate::estimate::estimate_bytes;
use crate::events::{SharedSink, StorageEvent, Tier, UpgradeReason, null_sink};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Document-tier record of a promoted cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradedEntry {
    /// Cache key.
    pub key: String,
    /// The caller's value, unchanged.
    pub value: Value,
    /// Provenance marker. Only records with this set are cache entries.
    #[serde(rename = "isUpgraded")]
    pub is_upgraded: bool,
}

impl UpgradedEntry {
    /// Wrap `value` as a promoted entry.
    #[must_use]
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            is_upgraded: true,
        }
    }

    /// Parse a document record, returning it only if it carries the marker.
    #[must_use]
    pub fn from_record(record: Value) -> Option<Self> {
        serde_json::from_value::<Self>(record)
            .ok()
            .filter(|entry| entry.is_upgraded)
    }
}

/// Result of an aggregate capacity check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeCheck {
    /// Whether the next write should be promoted to the document tier.
    #[serde(rename = "isUpgrade")]
    pub is_upgrade: bool,
}

/// The tiers wired into an engine.
///
/// "Available" means present: a `None` tier is skipped by every routing
/// decision.
#[derive(Debug, Clone)]
pub struct EngineTiers {
    /// Primary synchronous tier.
    pub sync: Option<SyncBoundedStore>,
    /// Final fallback, written when there is no primary.
    pub fallback: SyncBoundedStore,
    /// Asynchronous document tier.
    pub document: Option<Arc<AsyncDocumentStore>>,
    /// Host has unbounded synchronous capacity; aggregate checks never
    /// request promotion.
    pub unbounded_host: bool,
}

impl EngineTiers {
    /// Only the fallback tier.
    #[must_use]
    pub fn new(fallback: SyncBoundedStore) -> Self {
        Self {
            sync: None,
            fallback,
            document: None,
            unbounded_host: false,
        }
    }

    /// Add a primary synchronous tier.
    #[must_use]
    pub fn with_sync(mut self, sync: SyncBoundedStore) -> Self {
        self.sync = Some(sync);
        self
    }

    /// Add the document tier.
    #[must_use]
    pub fn with_document(mut self, document: Arc<AsyncDocumentStore>) -> Self {
        self.document = Some(document);
        self
    }

    /// Mark the host as unbounded.
    #[must_use]
    pub fn with_unbounded_host(mut self, unbounded: bool) -> Self {
        self.unbounded_host = unbounded;
        self
    }

    /// The synchronous tier writes go to: the primary, else the fallback.
    #[must_use]
    pub fn write_target(&self) -> &SyncBoundedStore {
        self.sync.as_ref().unwrap_or(&self.fallback)
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Routes cache entries between the synchronous and document tiers.
pub struct TieredCacheEngine {
    tiers: EngineTiers,
    budget: SizeBudget,
    sink: SharedSink,
}

impl std::fmt::Debug for TieredCacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCacheEngine")
            .field("sync", &self.tiers.sync.is_some())
            .field("document", &self.tiers.document.is_some())
            .field("unbounded_host", &self.tiers.unbounded_host)
            .field("budget", &self.budget)
            .finish_non_exhaustive()
    }
}

impl TieredCacheEngine {
    /// Create an engine over `tiers`.
    #[must_use]
    pub fn new(tiers: EngineTiers, budget: SizeBudget) -> Self {
        Self {
            tiers,
            budget,
            sink: null_sink(),
        }
    }

    /// Route diagnostics to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Wired tiers.
    #[must_use]
    pub fn tiers(&self) -> &EngineTiers {
        &self.tiers
    }

    /// Size budget.
    #[must_use]
    pub fn budget(&self) -> SizeBudget {
        self.budget
    }

    /// The document tier, if available.
    #[must_use]
    pub fn document(&self) -> Option<&Arc<AsyncDocumentStore>> {
        self.tiers.document.as_ref()
    }

    // -- Writes --

    /// Store `value` under `key` in whichever tier fits it.
    pub async fn set_cache_data(&self, key: &str, value: Value) {
        let serialized = match serde_json::to_string(&value) {
            Ok(s) => s,
            Err(e) => {
                warn!(key, error = %e, "failed to serialize cache value");
                self.sink.emit(&StorageEvent::SerializationFailure {
                    key: key.to_owned(),
                    error: e.to_string(),
                });
                return;
            },
        };
        let size = estimate_bytes(&serialized);

        if let Some(document) = &self.tiers.document
            && size > self.budget.upgrade_threshold
        {
            self.promote(document, key, value, size, UpgradeReason::ValueTooLarge)
                .await;
            return;
        }

        let check = self.check_cache_data_size_for(size);
        if check.is_upgrade
            && let Some(document) = &self.tiers.document
        {
            self.promote(document, key, value, size, UpgradeReason::AggregateCeiling)
                .await;
            return;
        }

        self.write_sync(key, serialized).await;
    }

    async fn promote(
        &self,
        document: &AsyncDocumentStore,
        key: &str,
        value: Value,
        bytes: usize,
        reason: UpgradeReason,
    ) {
        let written = serde_json::to_value(UpgradedEntry::new(key, value))
            .map_err(StorageError::from);
        let written = match written {
            Ok(record) => document.write_checked(GLOBAL_CONTAINER, key, record).await,
            Err(e) => Err(e),
        };
        if self.log_failure(Tier::Document, "write", written).is_none() {
            warn!(key, bytes, "cache entry upgrade failed, previous value kept");
            return;
        }

        // The document copy is authoritative now; drop the synchronous ones.
        if let Some(sync) = &self.tiers.sync {
            self.log_failure(Tier::Sync, "remove", sync.remove(key));
        }
        self.log_failure(Tier::Fallback, "remove", self.tiers.fallback.remove(key));

        info!(key, bytes, ?reason, "cache entry upgraded to document store");
        self.sink.emit(&StorageEvent::EntryUpgraded {
            key: key.to_owned(),
            bytes,
            reason,
        });
    }

    async fn write_sync(&self, key: &str, serialized: String) {
        let target = self.tiers.write_target();
        if self
            .log_failure(target.tier(), "set", target.set_raw(key, serialized))
            .is_none()
        {
            return;
        }

        if self.tiers.sync.is_some() {
            self.log_failure(Tier::Fallback, "remove", self.tiers.fallback.remove(key));
        }
        if let Some(document) = &self.tiers.document
            && self.read_marked(document, key).await.is_some()
        {
            debug!(key, "dropping upgraded copy superseded by synchronous write");
            if let Err(e) = document.delete(GLOBAL_CONTAINER, key).await {
                self.log_failure(Tier::Document, "delete", Err::<(), _>(e));
            }
        }
    }

    // -- Reads --

    /// Resolve `key` across tiers, or the empty object `{}` if no tier
    /// holds it.
    pub async fn get_cache_data(&self, key: &str) -> Value {
        self.find_cache_data(key).await.unwrap_or_else(empty_object)
    }

    /// Resolve `key` across tiers: primary, marked document record, then
    /// fallback. Returns `None` if no tier holds it.
    pub async fn find_cache_data(&self, key: &str) -> Option<Value> {
        if let Some(sync) = &self.tiers.sync
            && let Some(value) = self.log_failure(Tier::Sync, "get", sync.get(key)).flatten()
        {
            return Some(value);
        }

        if let Some(document) = &self.tiers.document
            && let Some(entry) = self.read_marked(document, key).await
        {
            return Some(entry.value);
        }

        self.log_failure(Tier::Fallback, "get", self.tiers.fallback.get(key))
            .flatten()
    }

    async fn read_marked(&self, document: &AsyncDocumentStore, key: &str) -> Option<UpgradedEntry> {
        match document.read(GLOBAL_CONTAINER, key).await {
            Ok(record) => record.and_then(UpgradedEntry::from_record),
            Err(e) => {
                self.log_failure(Tier::Document, "read", Err::<(), _>(e));
                None
            },
        }
    }

    /// Read `key`, then remove it. Returns the value read before removal.
    pub async fn get_once_cache_data(&self, key: &str) -> Value {
        let value = self.get_cache_data(key).await;
        self.remove_cache_data(key).await;
        value
    }

    // -- Removal --

    /// Remove `key` from the first tier that holds it.
    pub async fn remove_cache_data(&self, key: &str) {
        if let Some(sync) = &self.tiers.sync
            && self
                .log_failure(Tier::Sync, "contains", sync.contains(key))
                .unwrap_or(false)
        {
            self.log_failure(Tier::Sync, "remove", sync.remove(key));
            return;
        }

        if let Some(document) = &self.tiers.document
            && self.read_marked(document, key).await.is_some()
        {
            if let Err(e) = document.delete(GLOBAL_CONTAINER, key).await {
                self.log_failure(Tier::Document, "delete", Err::<(), _>(e));
            }
            return;
        }

        self.log_failure(Tier::Fallback, "remove", self.tiers.fallback.remove(key));
    }

    /// Wipe the synchronous write target. Upgraded document records are
    /// left in place.
    pub fn clear_cache_data(&self) {
        let target = self.tiers.write_target();
        self.log_failure(target.tier(), "clear", target.clear());
    }

    // -- Capacity --

    /// Whether the synchronous tiers are over their ceilings.
    #[must_use]
    pub fn check_cache_data_size(&self) -> SizeCheck {
        self.check_cache_data_size_for(0)
    }

    /// Whether a write of `incoming` bytes would push the synchronous tiers
    /// over their ceilings.
    #[must_use]
    pub fn check_cache_data_size_for(&self, incoming: usize) -> SizeCheck {
        if self.tiers.unbounded_host {
            return SizeCheck::default();
        }

        let primary = self.tiers.sync.as_ref().is_some_and(|sync| {
            self.log_failure(Tier::Sync, "check_capacity", sync.check_capacity_for(incoming))
                .unwrap_or(false)
        });
        // The fallback only receives the write when there is no primary.
        let fallback_incoming = if self.tiers.sync.is_some() { 0 } else { incoming };
        let fallback = self
            .log_failure(
                Tier::Fallback,
                "check_capacity",
                self.tiers.fallback.check_capacity_for(fallback_incoming),
            )
            .unwrap_or(false);

        SizeCheck {
            is_upgrade: primary || fallback,
        }
    }

    // -- Listing --

    /// Every key in the synchronous write target, resolved through
    /// [`get_cache_data`](Self::get_cache_data).
    pub async fn get_cache_data_info(&self) -> BTreeMap<String, Value> {
        let target = self.tiers.write_target();
        let keys = self
            .log_failure(target.tier(), "list_keys", target.keys())
            .unwrap_or_default();

        let mut info = BTreeMap::new();
        for key in keys {
            let value = self.get_cache_data(&key).await;
            info.insert(key, value);
        }
        info
    }

    // -- Typed convenience (JSON) --

    /// Serialize `value` and store it under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if `value` cannot be encoded.
    pub async fn set_cache_json<T: Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let value = serde_json::to_value(value)?;
        self.set_cache_data(key, value).await;
        Ok(())
    }

    /// Resolve `key` and deserialize it. Returns `None` if no tier holds it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the stored value does not
    /// match `T`.
    pub async fn get_cache_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> StorageResult<Option<T>> {
        self.find_cache_data(key)
            .await
            .map(|v| serde_json::from_value(v).map_err(StorageError::from))
            .transpose()
    }

    /// Log and report a failed tier call, passing success through.
    fn log_failure<T>(
        &self,
        tier: Tier,
        operation: &'static str,
        result: StorageResult<T>,
    ) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                error!(%tier, operation, error = %e, "cache tier operation failed");
                self.sink.emit(&StorageEvent::BackendFailure {
                    tier,
                    operation,
                    error: e.to_string(),
                });
                None
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::bounded::{MemorySyncStorage, SyncStorage};
    use crate::document::{
        DocumentBackend, DocumentConnection, MemoryDocumentBackend, SchemaUpgrade,
    };
    use crate::events::EventSink;

    #[derive(Default)]
    struct Capture(Mutex<Vec<StorageEvent>>);

    impl EventSink for Capture {
        fn emit(&self, event: &StorageEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    struct Rig {
        engine: TieredCacheEngine,
        sync: Arc<MemorySyncStorage>,
        fallback: Arc<MemorySyncStorage>,
        document: Option<Arc<AsyncDocumentStore>>,
        events: Arc<Capture>,
    }

    /// A JSON string whose serialized form estimates to exactly `bytes`.
    fn sized(bytes: usize) -> Value {
        json!("x".repeat(bytes.saturating_sub(2)))
    }

    /// Document backend that refuses every open.
    struct RefusingBackend;

    #[async_trait::async_trait]
    impl DocumentBackend for RefusingBackend {
        async fn open(
            &self,
            name: &str,
            _version: Option<u32>,
            _upgrade: &SchemaUpgrade,
        ) -> StorageResult<Arc<dyn DocumentConnection>> {
            Err(StorageError::Connection(format!("{name} is unavailable")))
        }
    }

    /// Sync storage that reads as empty and rejects every write.
    struct FullSyncStorage;

    impl SyncStorage for FullSyncStorage {
        fn set_item(&self, _key: &str, _value: String) -> StorageResult<()> {
            Err(StorageError::Internal("quota exceeded".into()))
        }
        fn get_item(&self, _key: &str) -> StorageResult<Option<String>> {
            Ok(None)
        }
        fn remove_item(&self, _key: &str) -> StorageResult<()> {
            Ok(())
        }
        fn clear(&self) -> StorageResult<()> {
            Ok(())
        }
        fn list_keys(&self) -> StorageResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn rig(budget: SizeBudget, with_sync: bool, with_document: bool) -> Rig {
        let backend = with_document
            .then(|| Arc::new(MemoryDocumentBackend::new()) as Arc<dyn DocumentBackend>);
        rig_over(budget, with_sync, backend)
    }

    fn rig_over(
        budget: SizeBudget,
        with_sync: bool,
        backend: Option<Arc<dyn DocumentBackend>>,
    ) -> Rig {
        let sync = Arc::new(MemorySyncStorage::new());
        let fallback = Arc::new(MemorySyncStorage::new());
        let document =
            backend.map(|backend| Arc::new(AsyncDocumentStore::new(backend, "cache-test")));

        let mut tiers = EngineTiers::new(SyncBoundedStore::fallback(fallback.clone(), &budget));
        if with_sync {
            tiers = tiers.with_sync(SyncBoundedStore::new(sync.clone(), &budget));
        }
        if let Some(document) = &document {
            tiers = tiers.with_document(document.clone());
        }

        let events = Arc::new(Capture::default());
        let engine = TieredCacheEngine::new(tiers, budget).with_sink(events.clone());
        Rig {
            engine,
            sync,
            fallback,
            document,
            events,
        }
    }

    fn small_budget() -> SizeBudget {
        SizeBudget::default()
            .with_sync_ceiling(100)
            .with_upgrade_threshold(40)
    }

    async fn record(rig: &Rig, key: &str) -> Option<Value> {
        rig.document
            .as_ref()
            .unwrap()
            .read(GLOBAL_CONTAINER, key)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_small_value_stays_in_sync_tier() {
        let rig = rig(small_budget(), true, true);
        let value = json!({"a": 1});
        rig.engine.set_cache_data("k", value.clone()).await;

        assert_eq!(rig.engine.get_cache_data("k").await, value);
        assert_eq!(rig.sync.get_item("k").unwrap().as_deref(), Some(r#"{"a":1}"#));
        assert!(record(&rig, "k").await.is_none());
        assert!(rig.fallback.get_item("k").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_large_value_is_upgraded_and_unwrapped() {
        let rig = rig(small_budget(), true, true);
        let value = sized(41);
        rig.engine.set_cache_data("big", value.clone()).await;

        assert!(rig.sync.get_item("big").unwrap().is_none());
        let stored = record(&rig, "big").await.unwrap();
        assert_eq!(stored["isUpgraded"], json!(true));
        assert_eq!(stored["key"], json!("big"));
        assert_eq!(rig.engine.get_cache_data("big").await, value);

        let events = rig.events.0.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            StorageEvent::EntryUpgraded {
                reason: UpgradeReason::ValueTooLarge,
                bytes: 41,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_value_at_threshold_is_not_upgraded() {
        let rig = rig(small_budget(), true, true);
        rig.engine.set_cache_data("edge", sized(40)).await;
        assert!(rig.sync.get_item("edge").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_aggregate_ceiling_upgrades_small_value() {
        let rig = rig(small_budget(), true, true);
        // 3 * 32 = 96 bytes in the sync tier.
        for key in ["a", "b", "c"] {
            rig.engine.set_cache_data(key, sized(32)).await;
        }
        assert_eq!(rig.sync.list_keys().unwrap().len(), 3);

        rig.engine.set_cache_data("d", sized(10)).await;
        assert!(rig.sync.get_item("d").unwrap().is_none());
        assert!(record(&rig, "d").await.is_some());
        assert_eq!(rig.engine.get_cache_data("d").await, sized(10));
        assert!(rig.events.0.lock().unwrap().iter().any(|e| matches!(
            e,
            StorageEvent::EntryUpgraded {
                reason: UpgradeReason::AggregateCeiling,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_without_document_tier_large_values_stay_sync() {
        let rig = rig(small_budget(), true, false);
        rig.engine.set_cache_data("big", sized(500)).await;
        assert!(rig.sync.get_item("big").unwrap().is_some());
        assert_eq!(rig.engine.get_cache_data("big").await, sized(500));
    }

    #[tokio::test]
    async fn test_without_sync_tier_writes_fallback() {
        let rig = rig(small_budget(), false, false);
        rig.engine.set_cache_data("k", json!([1, 2, 3])).await;
        assert_eq!(rig.fallback.get_item("k").unwrap().as_deref(), Some("[1,2,3]"));
        assert_eq!(rig.engine.get_cache_data("k").await, json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_missing_key_reads_empty_object() {
        let rig = rig(small_budget(), true, true);
        assert_eq!(rig.engine.get_cache_data("nope").await, json!({}));
        assert!(
            rig.engine
                .get_cache_json::<String>("nope")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_unmarked_document_is_ignored() {
        let rig = rig(small_budget(), true, true);
        rig.document
            .as_ref()
            .unwrap()
            .write(GLOBAL_CONTAINER, "plain", json!({"value": 1}))
            .await
            .unwrap();
        assert_eq!(rig.engine.get_cache_data("plain").await, json!({}));

        rig.engine.remove_cache_data("plain").await;
        assert!(record(&rig, "plain").await.is_some());
    }

    #[tokio::test]
    async fn test_set_get_remove_get() {
        let rig = rig(small_budget(), true, true);
        for (key, value) in [("small", json!("hi")), ("large", sized(60))] {
            rig.engine.set_cache_data(key, value.clone()).await;
            assert_eq!(rig.engine.get_cache_data(key).await, value);
            rig.engine.remove_cache_data(key).await;
            assert_eq!(rig.engine.get_cache_data(key).await, json!({}));
        }
        assert!(record(&rig, "large").await.is_none());
    }

    #[tokio::test]
    async fn test_get_once_leaves_nothing() {
        let rig = rig(small_budget(), true, true);
        rig.engine.set_cache_data("s", json!(1)).await;
        rig.engine.set_cache_data("l", sized(80)).await;

        assert_eq!(rig.engine.get_once_cache_data("s").await, json!(1));
        assert_eq!(rig.engine.get_once_cache_data("l").await, sized(80));
        assert!(rig.sync.get_item("s").unwrap().is_none());
        assert!(record(&rig, "l").await.is_none());
    }

    #[tokio::test]
    async fn test_resetting_promoted_key_small_drops_document_copy() {
        let rig = rig(small_budget(), true, true);
        rig.engine.set_cache_data("k", sized(90)).await;
        assert!(record(&rig, "k").await.is_some());

        rig.engine.set_cache_data("k", json!("tiny")).await;
        assert!(record(&rig, "k").await.is_none());
        assert_eq!(rig.engine.get_cache_data("k").await, json!("tiny"));
    }

    #[tokio::test]
    async fn test_promoting_key_drops_sync_copy() {
        let rig = rig(small_budget(), true, true);
        rig.engine.set_cache_data("k", json!("tiny")).await;
        rig.engine.set_cache_data("k", sized(90)).await;
        assert!(rig.sync.get_item("k").unwrap().is_none());
        assert_eq!(rig.engine.get_cache_data("k").await, sized(90));
    }

    #[tokio::test]
    async fn test_failed_upgrade_keeps_previous_value() {
        let rig = rig_over(small_budget(), true, Some(Arc::new(RefusingBackend)));
        rig.engine.set_cache_data("k", json!("old")).await;
        rig.engine.set_cache_data("k", sized(90)).await;

        assert_eq!(rig.engine.get_cache_data("k").await, json!("old"));
        assert_eq!(rig.sync.get_item("k").unwrap().as_deref(), Some("\"old\""));
        let events = rig.events.0.lock().unwrap();
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, StorageEvent::EntryUpgraded { .. }))
        );
        assert!(events.iter().any(|e| matches!(
            e,
            StorageEvent::BackendFailure {
                tier: Tier::Document,
                operation: "write",
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_failed_sync_write_keeps_upgraded_copy() {
        let budget = small_budget();
        let document = Arc::new(AsyncDocumentStore::new(
            Arc::new(MemoryDocumentBackend::new()),
            "cache-test",
        ));
        let tiers = EngineTiers::new(SyncBoundedStore::fallback(
            Arc::new(MemorySyncStorage::new()),
            &budget,
        ))
        .with_sync(SyncBoundedStore::new(Arc::new(FullSyncStorage), &budget))
        .with_document(document.clone());
        let engine = TieredCacheEngine::new(tiers, budget);

        engine.set_cache_data("k", sized(90)).await;
        engine.set_cache_data("k", json!("tiny")).await;

        assert_eq!(engine.get_cache_data("k").await, sized(90));
        assert!(document.read(GLOBAL_CONTAINER, "k").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_keeps_upgraded_records() {
        let rig = rig(small_budget(), true, true);
        rig.engine.set_cache_data("a", json!(1)).await;
        rig.engine.set_cache_data("b", json!(2)).await;
        rig.engine.set_cache_data("big", sized(50)).await;

        let listed = rig.engine.get_cache_data_info().await;
        assert_eq!(listed.len(), 2);

        rig.engine.clear_cache_data();
        for key in listed.keys() {
            assert_eq!(rig.engine.get_cache_data(key).await, json!({}));
        }
        assert_eq!(rig.engine.get_cache_data("big").await, sized(50));
    }

    #[tokio::test]
    async fn test_info_resolves_each_key() {
        let rig = rig(small_budget(), false, false);
        rig.engine.set_cache_data("x", json!({"n": 1})).await;
        rig.engine.set_cache_data("y", json!(null)).await;
        let info = rig.engine.get_cache_data_info().await;
        assert_eq!(info["x"], json!({"n": 1}));
        assert_eq!(info["y"], json!(null));
    }

    #[tokio::test]
    async fn test_unbounded_host_never_upgrades_on_aggregate() {
        let budget = small_budget();
        let tiers = EngineTiers::new(SyncBoundedStore::fallback(
            Arc::new(MemorySyncStorage::new()),
            &budget,
        ))
        .with_sync(SyncBoundedStore::new(
            Arc::new(MemorySyncStorage::new()),
            &budget,
        ))
        .with_unbounded_host(true);
        let engine = TieredCacheEngine::new(tiers, budget);

        for i in 0..10 {
            engine.set_cache_data(&format!("k{i}"), sized(30)).await;
        }
        assert!(!engine.check_cache_data_size().is_upgrade);
        assert!(!engine.check_cache_data_size_for(10_000).is_upgrade);
    }

    #[tokio::test]
    async fn test_check_size_counts_fallback_without_primary() {
        let rig = rig(small_budget(), false, false);
        rig.engine.set_cache_data("a", sized(90)).await;
        assert!(!rig.engine.check_cache_data_size().is_upgrade);
        assert!(rig.engine.check_cache_data_size_for(20).is_upgrade);
    }

    #[tokio::test]
    async fn test_corrupt_sync_entry_falls_through() {
        let rig = rig(small_budget(), true, false);
        rig.sync.set_item("bad", "{not json".into()).unwrap();
        rig.fallback.set_item("bad", "\"from fallback\"".into()).unwrap();
        assert_eq!(rig.engine.get_cache_data("bad").await, json!("from fallback"));
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        #[derive(Serialize, Deserialize, Debug, PartialEq)]
        struct Session {
            user: String,
            scopes: Vec<String>,
        }

        let rig = rig(small_budget(), true, true);
        let session = Session {
            user: "ada".into(),
            scopes: vec!["read".into(), "write".into(), "admin".into()],
        };
        rig.engine.set_cache_json("session", &session).await.unwrap();
        let loaded: Session = rig.engine.get_cache_json("session").await.unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[test]
    fn test_upgraded_entry_wire_format() {
        let entry = UpgradedEntry::new("k", json!([1]));
        let wire = serde_json::to_value(&entry).unwrap();
        assert_eq!(wire, json!({"key": "k", "value": [1], "isUpgraded": true}));
        assert_eq!(UpgradedEntry::from_record(wire), Some(entry));
        let unmarked = json!({"key": "k", "value": 1, "isUpgraded": false});
        assert!(UpgradedEntry::from_record(unmarked).is_none());
        assert!(UpgradedEntry::from_record(json!("raw")).is_none());
    }
}
