//! Strata Storage: tiered key/value persistence.
//!
//! Hides three backends of increasing durability behind one
//! get/set/remove/clear interface:
//!
//! # Tier 1: Memory ([`MemoryStore`])
//!
//! A process-local map. Its ceiling is advisory: crossing it only warns.
//!
//! # Tier 2: Synchronous bounded store ([`SyncBoundedStore`])
//!
//! JSON strings over a [`SyncStorage`] capability, with an aggregate byte
//! ceiling. A primary store is used when the host supports one, and a final
//! fallback is always present.
//!
//! # Tier 3: Versioned document store ([`AsyncDocumentStore`])
//!
//! Named containers in a schema-versioned [`DocumentBackend`]. One lazily
//! opened connection is reused and recovered once when it goes stale.
//!
//! # Routing
//!
//! [`TieredCacheEngine`] sends each cache write to the synchronous tier or
//! upgrades it to the document store when the value is over the single-write
//! threshold or the synchronous tier would exceed its ceiling. [`Strata`]
//! composes the memory tier and the engine into the application-facing API.
//!
//! | Operation family | Tier |
//! |------------------|------|
//! | `*_memory_data` | memory |
//! | `*_cache_data` | sync or document, decided per write |
//! | `*_db_data` | document (cache when unavailable) |
//!
//! # Feature Flags
//!
//! - **`kv`**: `SurrealKV`-backed persistent document backend
//! - **`config`**: build from `strata-config` sections

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod bounded;
pub mod budget;
pub mod capability;
pub mod document;
pub mod error;
pub mod estimate;
pub mod events;
pub mod facade;
pub mod memory;
pub mod prelude;
pub mod tiered;

pub use bounded::{FileSyncStorage, MemorySyncStorage, SyncBoundedStore, SyncStorage};
pub use budget::SizeBudget;
pub use capability::{CapabilityProbe, HostCapabilities};
pub use document::{
    AsyncDocumentStore, ConnectionState, DocumentBackend, DocumentConnection, GLOBAL_CONTAINER,
    MemoryDocumentBackend, SchemaUpgrade,
};
pub use error::{StorageError, StorageResult};
pub use estimate::{estimate_bytes, estimate_value_bytes};
pub use events::{EventSink, NullSink, SharedSink, StorageEvent, Tier, UpgradeReason};
pub use facade::{Strata, StrataBuilder};
pub use memory::MemoryStore;
pub use tiered::{EngineTiers, SizeCheck, TieredCacheEngine, UpgradedEntry};

#[cfg(feature = "kv")]
pub use document::SurrealKvDocumentBackend;
