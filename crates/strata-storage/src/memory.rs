//! Process-local memory tier.
//!
//! A plain map from key to JSON value with an advisory ceiling: when the
//! serialized map grows past [`SizeBudget::memory_ceiling`] every write logs a
//! warning and emits [`StorageEvent::MemoryCeilingExceeded`], but the write
//! always goes through. Nothing is ever evicted.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use tracing::{error, warn};

use crate::budget::SizeBudget;
use crate::error::{StorageError, StorageResult};
use crate::estimate::estimate_bytes;
use crate::events::{SharedSink, StorageEvent, Tier, null_sink};

/// In-memory key/value tier.
pub struct MemoryStore {
    data: RwLock<HashMap<String, Value>>,
    ceiling: usize,
    sink: SharedSink,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = self.data.read().map(|d| d.len()).unwrap_or_default();
        f.debug_struct("MemoryStore")
            .field("entries", &len)
            .field("ceiling", &self.ceiling)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(&SizeBudget::default())
    }
}

impl MemoryStore {
    /// Create an empty store using the budget's memory ceiling.
    #[must_use]
    pub fn new(budget: &SizeBudget) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            ceiling: budget.memory_ceiling,
            sink: null_sink(),
        }
    }

    /// Route diagnostics to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// The ceiling check runs against the map as it is before this write.
    pub fn set(&self, key: &str, value: Value) {
        self.check_size();
        match self.data.write() {
            Ok(mut data) => {
                data.insert(key.to_owned(), value);
            },
            Err(e) => self.report_lock_failure("set", &e.to_string()),
        }
    }

    /// Get a clone of the value under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.data.read() {
            Ok(data) => data.get(key).cloned(),
            Err(e) => {
                self.report_lock_failure("get", &e.to_string());
                None
            },
        }
    }

    /// Remove `key`, returning the value it held.
    pub fn remove(&self, key: &str) -> Option<Value> {
        match self.data.write() {
            Ok(mut data) => data.remove(key),
            Err(e) => {
                self.report_lock_failure("remove", &e.to_string());
                None
            },
        }
    }

    /// Read `key` and remove it.
    pub fn get_once(&self, key: &str) -> Option<Value> {
        self.remove(key)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        match self.data.write() {
            Ok(mut data) => data.clear(),
            Err(e) => self.report_lock_failure("clear", &e.to_string()),
        }
    }

    /// Snapshot of every entry.
    #[must_use]
    pub fn get_all(&self) -> HashMap<String, Value> {
        match self.data.read() {
            Ok(data) => data.clone(),
            Err(e) => {
                self.report_lock_failure("get_all", &e.to_string());
                HashMap::new()
            },
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or_default()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Estimate the serialized size of the whole map and warn when it is
    /// over the ceiling. Returns the estimate.
    pub fn check_size(&self) -> usize {
        let bytes = match self.serialized_size() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to measure memory tier");
                return 0;
            },
        };
        if bytes > self.ceiling {
            warn!(
                bytes,
                ceiling = self.ceiling,
                "memory data size exceeded; consider removing unused data"
            );
            self.sink.emit(&StorageEvent::MemoryCeilingExceeded {
                bytes,
                ceiling: self.ceiling,
            });
        }
        bytes
    }

    /// Typed write.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if `value` cannot be
    /// represented as JSON.
    pub fn set_json<T: serde::Serialize>(&self, key: &str, value: &T) -> StorageResult<()> {
        let value = serde_json::to_value(value)?;
        self.set(key, value);
        Ok(())
    }

    /// Typed read. Returns `None` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the stored value does not
    /// match `T`.
    pub fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        self.get(key)
            .map(|v| serde_json::from_value(v).map_err(StorageError::from))
            .transpose()
    }

    fn serialized_size(&self) -> StorageResult<usize> {
        let data = self
            .data
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        let serialized = serde_json::to_string(&*data)?;
        Ok(estimate_bytes(&serialized))
    }

    fn report_lock_failure(&self, operation: &'static str, err: &str) {
        error!(operation, error = err, "memory tier lock poisoned");
        self.sink.emit(&StorageEvent::BackendFailure {
            tier: Tier::Memory,
            operation,
            error: err.to_owned(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use super::*;
    use crate::events::EventSink;

    #[derive(Default)]
    struct Capture(Mutex<Vec<StorageEvent>>);

    impl EventSink for Capture {
        fn emit(&self, event: &StorageEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_set_get_remove() {
        let store = MemoryStore::default();
        store.set("user", json!({"name": "ada"}));
        assert_eq!(store.get("user"), Some(json!({"name": "ada"})));
        assert_eq!(store.remove("user"), Some(json!({"name": "ada"})));
        assert!(store.get("user").is_none());
    }

    #[test]
    fn test_get_once_removes() {
        let store = MemoryStore::default();
        store.set("token", json!("abc"));
        assert_eq!(store.get_once("token"), Some(json!("abc")));
        assert!(store.get("token").is_none());
    }

    #[test]
    fn test_clear_and_get_all() {
        let store = MemoryStore::default();
        store.set("a", json!(1));
        store.set("b", json!(2));
        assert_eq!(store.get_all().len(), 2);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_ceiling_is_advisory() {
        let capture = Arc::new(Capture::default());
        let budget = SizeBudget::default().with_memory_ceiling(8);
        let store = MemoryStore::new(&budget).with_sink(capture.clone());

        store.set("first", json!("a long enough string"));
        // The map is now over the ceiling; the next write still succeeds.
        store.set("second", json!(2));

        assert_eq!(store.get("second"), Some(json!(2)));
        let events = capture.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            StorageEvent::MemoryCeilingExceeded { ceiling: 8, .. }
        ));
    }

    #[test]
    fn test_json_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, Debug, PartialEq)]
        struct Prefs {
            theme: String,
            zoom: u8,
        }

        let store = MemoryStore::default();
        let prefs = Prefs {
            theme: "dark".into(),
            zoom: 110,
        };
        store.set_json("prefs", &prefs).unwrap();
        let loaded: Prefs = store.get_json("prefs").unwrap().unwrap();
        assert_eq!(loaded, prefs);
    }
}
