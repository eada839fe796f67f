//! Diagnostic events emitted by the storage tiers.
//!
//! Every tier logs through `tracing`. In addition, each notable decision or
//! swallowed failure is delivered as a [`StorageEvent`] to an injected
//! [`EventSink`], so callers can observe the fail-soft paths without
//! scraping log output.

use std::fmt;
use std::sync::Arc;

/// Which storage tier an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Process-local memory map.
    Memory,
    /// Primary synchronous bounded store.
    Sync,
    /// Final synchronous fallback store.
    Fallback,
    /// Asynchronous versioned document store.
    Document,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Memory => "memory",
            Self::Sync => "sync",
            Self::Fallback => "fallback",
            Self::Document => "document",
        };
        f.write_str(name)
    }
}

/// Why an entry was routed to the document tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeReason {
    /// The single value exceeded the per-write upgrade threshold.
    ValueTooLarge,
    /// The synchronous tier's aggregate usage would exceed its ceiling.
    AggregateCeiling,
}

/// A diagnostic event from one of the tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
    /// The memory map is larger than its advisory ceiling. The write proceeded.
    MemoryCeilingExceeded {
        /// Estimated size of the whole map.
        bytes: usize,
        /// Configured advisory ceiling.
        ceiling: usize,
    },
    /// A synchronous tier's aggregate usage exceeds its ceiling.
    SyncCeilingExceeded {
        /// Tier whose ceiling was crossed.
        tier: Tier,
        /// Estimated aggregate size, including any pending write.
        bytes: usize,
        /// Configured ceiling.
        ceiling: usize,
    },
    /// A cache entry was promoted to the document tier.
    EntryUpgraded {
        /// Cache key.
        key: String,
        /// Estimated size of the value.
        bytes: usize,
        /// What triggered the promotion.
        reason: UpgradeReason,
    },
    /// The document store found its connection stale and is reopening.
    StaleConnection {
        /// Operation that hit the stale connection.
        operation: &'static str,
    },
    /// The document store opened a connection.
    ConnectionOpened {
        /// Schema version of the new connection.
        version: u32,
    },
    /// The document store released its connection.
    ConnectionClosed,
    /// A container was added to or removed from the document schema.
    SchemaChanged {
        /// Container name.
        container: String,
        /// Whether the container was created (`true`) or deleted.
        created: bool,
        /// Schema version after the change.
        version: u32,
    },
    /// A backend operation failed and was resolved to a neutral value.
    BackendFailure {
        /// Tier that failed.
        tier: Tier,
        /// Operation name.
        operation: &'static str,
        /// Rendered error.
        error: String,
    },
    /// A value could not be serialized or a stored string could not be parsed.
    SerializationFailure {
        /// Key involved.
        key: String,
        /// Rendered error.
        error: String,
    },
}

impl StorageEvent {
    /// Short machine-friendly name of the event kind.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::MemoryCeilingExceeded { .. } => "memory_ceiling_exceeded",
            Self::SyncCeilingExceeded { .. } => "sync_ceiling_exceeded",
            Self::EntryUpgraded { .. } => "entry_upgraded",
            Self::StaleConnection { .. } => "stale_connection",
            Self::ConnectionOpened { .. } => "connection_opened",
            Self::ConnectionClosed => "connection_closed",
            Self::SchemaChanged { .. } => "schema_changed",
            Self::BackendFailure { .. } => "backend_failure",
            Self::SerializationFailure { .. } => "serialization_failure",
        }
    }
}

/// Receiver for storage diagnostics.
///
/// Sinks are called inline on the storage path and should return quickly.
pub trait EventSink: Send + Sync {
    /// Called for every event.
    fn emit(&self, event: &StorageEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &StorageEvent) {}
}

/// Shared handle to an event sink.
pub type SharedSink = Arc<dyn EventSink>;

/// The default sink used when none is injected.
#[must_use]
pub fn null_sink() -> SharedSink {
    Arc::new(NullSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_names() {
        assert_eq!(
            StorageEvent::StaleConnection { operation: "read" }.event_type(),
            "stale_connection"
        );
        assert_eq!(StorageEvent::ConnectionClosed.event_type(), "connection_closed");
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::Document.to_string(), "document");
        assert_eq!(Tier::Fallback.to_string(), "fallback");
    }

    #[test]
    fn test_null_sink_accepts_events() {
        let sink = null_sink();
        sink.emit(&StorageEvent::ConnectionClosed);
    }
}
