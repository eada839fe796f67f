//! Test fixtures for common values.

use serde_json::Value;

use strata_storage::{HostCapabilities, SizeBudget};

/// A JSON string whose serialized form (quotes included) is estimated at
/// exactly `bytes` bytes.
///
/// Values under 2 bytes cannot be expressed as a string and come back as
/// the empty string (2 bytes).
#[must_use]
pub fn sized_value(bytes: usize) -> Value {
    Value::String("x".repeat(bytes.saturating_sub(2)))
}

/// A small budget for exercising ceilings without megabyte values.
///
/// Memory ceiling 200, synchronous ceiling 100, upgrade threshold 40.
#[must_use]
pub fn test_budget() -> SizeBudget {
    SizeBudget::default()
        .with_memory_ceiling(200)
        .with_sync_ceiling(100)
        .with_upgrade_threshold(40)
}

/// Capabilities of a host with every tier available and bounded storage.
#[must_use]
pub fn test_capabilities() -> HostCapabilities {
    HostCapabilities::default()
}
