//! Mock implementations for testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use strata_storage::{
    DocumentBackend, DocumentConnection, EventSink, MemoryDocumentBackend, SchemaUpgrade,
    SharedSink, StorageError, StorageEvent, StorageResult, SyncStorage,
};

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

/// Event sink that keeps every event it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<StorageEvent>>>,
}

impl RecordingSink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A [`SharedSink`] handle that records into this sink.
    #[must_use]
    pub fn shared(&self) -> SharedSink {
        Arc::new(self.clone())
    }

    /// Snapshot of the recorded events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<StorageEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Number of recorded events whose [`StorageEvent::event_type`] is
    /// `event_type`.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .map(|e| e.iter().filter(|ev| ev.event_type() == event_type).count())
            .unwrap_or(0)
    }

    /// Whether no events were recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().map(|e| e.is_empty()).unwrap_or(true)
    }

    /// Forget every recorded event.
    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &StorageEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// FlakyDocumentBackend
// ---------------------------------------------------------------------------

/// Fault budget shared by a backend and every connection it hands out.
#[derive(Debug, Default)]
struct Faults {
    stale: AtomicUsize,
    failing: AtomicUsize,
    refuse_opens: AtomicBool,
    opens: AtomicUsize,
}

impl Faults {
    /// Consume one unit of `counter` if any remain.
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check(&self, operation: &str) -> StorageResult<()> {
        if Self::take(&self.stale) {
            return Err(StorageError::StaleConnection(format!(
                "injected stale connection during {operation}"
            )));
        }
        if Self::take(&self.failing) {
            return Err(StorageError::Internal(format!(
                "injected failure during {operation}"
            )));
        }
        Ok(())
    }
}

/// [`DocumentBackend`] that wraps a working backend and injects failures.
///
/// Faults are consumed in order by data operations on any connection: first
/// the stale-connection budget, then the generic failure budget. The
/// wrapped backend defaults to a fresh [`MemoryDocumentBackend`].
#[derive(Clone)]
pub struct FlakyDocumentBackend {
    inner: Arc<dyn DocumentBackend>,
    faults: Arc<Faults>,
}

impl std::fmt::Debug for FlakyDocumentBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyDocumentBackend")
            .field("faults", &self.faults)
            .finish_non_exhaustive()
    }
}

impl Default for FlakyDocumentBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyDocumentBackend {
    /// Wrap a fresh in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::wrap(Arc::new(MemoryDocumentBackend::new()))
    }

    /// Wrap an existing backend.
    #[must_use]
    pub fn wrap(inner: Arc<dyn DocumentBackend>) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Fail the next `count` data operations with a stale connection.
    #[must_use]
    pub fn with_stale_failures(self, count: usize) -> Self {
        self.inject_stale(count);
        self
    }

    /// Fail the next `count` data operations with an internal error.
    #[must_use]
    pub fn with_failures(self, count: usize) -> Self {
        self.inject_failures(count);
        self
    }

    /// Add `count` stale-connection faults to the remaining budget.
    pub fn inject_stale(&self, count: usize) {
        self.faults.stale.fetch_add(count, Ordering::SeqCst);
    }

    /// Add `count` internal-error faults to the remaining budget.
    pub fn inject_failures(&self, count: usize) {
        self.faults.failing.fetch_add(count, Ordering::SeqCst);
    }

    /// Refuse (or allow again) every open with a connection error.
    pub fn refuse_opens(&self, refuse: bool) {
        self.faults.refuse_opens.store(refuse, Ordering::SeqCst);
    }

    /// Number of open calls that reached this backend, refused ones included.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.faults.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentBackend for FlakyDocumentBackend {
    async fn open(
        &self,
        name: &str,
        version: Option<u32>,
        upgrade: &SchemaUpgrade,
    ) -> StorageResult<Arc<dyn DocumentConnection>> {
        self.faults.opens.fetch_add(1, Ordering::SeqCst);
        if self.faults.refuse_opens.load(Ordering::SeqCst) {
            return Err(StorageError::Connection(format!(
                "injected refusal opening {name}"
            )));
        }
        let inner = self.inner.open(name, version, upgrade).await?;
        Ok(Arc::new(FlakyConnection {
            inner,
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct FlakyConnection {
    inner: Arc<dyn DocumentConnection>,
    faults: Arc<Faults>,
}

#[async_trait]
impl DocumentConnection for FlakyConnection {
    fn version(&self) -> u32 {
        self.inner.version()
    }

    fn container_names(&self) -> Vec<String> {
        self.inner.container_names()
    }

    async fn put(&self, container: &str, key: &str, value: Value) -> StorageResult<()> {
        self.faults.check("put")?;
        self.inner.put(container, key, value).await
    }

    async fn get(&self, container: &str, key: &str) -> StorageResult<Option<Value>> {
        self.faults.check("get")?;
        self.inner.get(container, key).await
    }

    async fn delete(&self, container: &str, key: &str) -> StorageResult<()> {
        self.faults.check("delete")?;
        self.inner.delete(container, key).await
    }

    async fn clear(&self, container: &str) -> StorageResult<()> {
        self.faults.check("clear")?;
        self.inner.clear(container).await
    }

    async fn get_all(&self, container: &str) -> StorageResult<Vec<Value>> {
        self.faults.check("get_all")?;
        self.inner.get_all(container).await
    }

    fn close(&self) {
        self.inner.close();
    }
}

// ---------------------------------------------------------------------------
// FailingSyncStorage
// ---------------------------------------------------------------------------

/// [`SyncStorage`] whose every call fails, like a host store that throws on
/// access.
#[derive(Debug, Clone, Default)]
pub struct FailingSyncStorage {
    message: String,
}

impl FailingSyncStorage {
    /// Create a store that fails with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    fn fail<T>(&self) -> StorageResult<T> {
        Err(StorageError::Internal(self.message.clone()))
    }
}

impl SyncStorage for FailingSyncStorage {
    fn set_item(&self, _key: &str, _value: String) -> StorageResult<()> {
        self.fail()
    }

    fn get_item(&self, _key: &str) -> StorageResult<Option<String>> {
        self.fail()
    }

    fn remove_item(&self, _key: &str) -> StorageResult<()> {
        self.fail()
    }

    fn clear(&self) -> StorageResult<()> {
        self.fail()
    }

    fn list_keys(&self) -> StorageResult<Vec<String>> {
        self.fail()
    }
}
