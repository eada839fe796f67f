//! Prelude module - commonly used types for convenient import.
//!
//! Use `use strata_storage::prelude::*;` to import all essential types.
//!
//! # Example
//!
//! ```rust,no_run
//! use strata_storage::prelude::*;
//! use serde_json::json;
//!
//! # async fn demo() {
//! let strata = Strata::builder()
//!     .budget(SizeBudget::default().with_upgrade_threshold(64 * 1024))
//!     .capabilities(HostCapabilities::default())
//!     .build();
//!
//! strata.set_cache_data("draft", json!({"body": "..."})).await;
//! let draft = strata.get_cache_data("draft").await;
//! # let _ = draft;
//! # }
//! ```

// Errors
pub use crate::error::{StorageError, StorageResult};

// Facade
pub use crate::facade::{Strata, StrataBuilder};

// Configuration of tiers
pub use crate::budget::SizeBudget;
pub use crate::capability::{CapabilityProbe, HostCapabilities};

// Capabilities
pub use crate::bounded::{FileSyncStorage, MemorySyncStorage, SyncStorage};
pub use crate::document::{DocumentBackend, GLOBAL_CONTAINER, MemoryDocumentBackend};

// Diagnostics
pub use crate::events::{EventSink, SharedSink, StorageEvent};

// Results
pub use crate::tiered::SizeCheck;
