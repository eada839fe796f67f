//! Approximate serialized byte sizes.
//!
//! Sizes are counted per UTF-16 code unit with the cost table of a
//! variable-width byte encoding:
//!
//! | Code unit        | Bytes |
//! |------------------|-------|
//! | `< 0x007F`       | 1     |
//! | `< 0x07FF`       | 2     |
//! | `< 0xFFFF`       | 3     |
//! | otherwise        | 4     |
//!
//! This is not a real encoding pass. A surrogate pair is two code units and
//! is therefore counted as 6 bytes rather than the 4 a UTF-8 encoder would
//! emit, so the estimate errs on the large side for astral characters.

use serde_json::Value;

use crate::error::StorageResult;

/// Estimate the encoded size of an already-serialized string.
#[must_use]
pub fn estimate_bytes(serialized: &str) -> usize {
    serialized
        .encode_utf16()
        .map(|unit| match unit {
            0..0x007F => 1_usize,
            0x007F..0x07FF => 2,
            0x07FF..0xFFFF => 3,
            _ => 4,
        })
        .fold(0_usize, usize::saturating_add)
}

/// Serialize `value` as compact JSON and estimate its size.
///
/// # Errors
///
/// Returns [`StorageError::Serialization`](crate::StorageError::Serialization)
/// if the value cannot be serialized.
pub fn estimate_value_bytes(value: &Value) -> StorageResult<usize> {
    let serialized = serde_json::to_string(value)?;
    Ok(estimate_bytes(&serialized))
}
