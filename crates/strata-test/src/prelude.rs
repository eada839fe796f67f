//! Prelude module: commonly used test helpers.

pub use crate::fixtures::{sized_value, test_budget, test_capabilities};
pub use crate::harness::{init_test_logging, test_strata};
pub use crate::mocks::{FailingSyncStorage, FlakyDocumentBackend, RecordingSink};
