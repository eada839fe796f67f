//! Strata Test: shared test utilities for the Strata storage crates.
//!
//! Mocks for the capabilities the storage tiers depend on, plus fixtures
//! for building values of a known estimated size.
//!
//! ```toml
//! [dev-dependencies]
//! strata-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use strata_test::{FlakyDocumentBackend, RecordingSink};
//!
//! #[tokio::test]
//! async fn test_recovers_from_stale_connection() {
//!     let backend = FlakyDocumentBackend::new().with_stale_failures(1);
//!     let sink = RecordingSink::new();
//!     let store = AsyncDocumentStore::new(Arc::new(backend), "app")
//!         .with_sink(sink.shared());
//!
//!     store.write(GLOBAL_CONTAINER, "k", json!(1)).await.unwrap();
//!     assert_eq!(sink.count("stale_connection"), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod mocks;

pub use fixtures::*;
pub use harness::*;
pub use mocks::*;
