//! Per-tier size ceilings.

/// One mebibyte.
pub const MIB: usize = 1024 * 1024;

/// Default advisory ceiling for the memory tier (10 MiB).
pub const DEFAULT_MEMORY_CEILING: usize = 10 * MIB;

/// Default aggregate ceiling for the synchronous tier (5 MiB).
pub const DEFAULT_SYNC_CEILING: usize = 5 * MIB;

/// Default single-write threshold above which a value goes straight to the
/// document tier (1 MiB).
pub const DEFAULT_UPGRADE_THRESHOLD: usize = MIB;

/// Immutable byte ceilings handed to each tier at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeBudget {
    /// Advisory ceiling for the whole memory map. Crossing it only warns.
    pub memory_ceiling: usize,
    /// Aggregate ceiling for the synchronous tier.
    pub sync_ceiling: usize,
    /// Size above which a single value bypasses the synchronous tier.
    pub upgrade_threshold: usize,
}

impl Default for SizeBudget {
    fn default() -> Self {
        Self {
            memory_ceiling: DEFAULT_MEMORY_CEILING,
            sync_ceiling: DEFAULT_SYNC_CEILING,
            upgrade_threshold: DEFAULT_UPGRADE_THRESHOLD,
        }
    }
}

impl SizeBudget {
    /// Set the memory ceiling.
    #[must_use]
    pub fn with_memory_ceiling(mut self, bytes: usize) -> Self {
        self.memory_ceiling = bytes;
        self
    }

    /// Set the synchronous-tier ceiling.
    #[must_use]
    pub fn with_sync_ceiling(mut self, bytes: usize) -> Self {
        self.sync_ceiling = bytes;
        self
    }

    /// Set the single-write upgrade threshold.
    #[must_use]
    pub fn with_upgrade_threshold(mut self, bytes: usize) -> Self {
        self.upgrade_threshold = bytes;
        self
    }
}

#[cfg(feature = "config")]
impl From<&strata_config::StorageSection> for SizeBudget {
    fn from(section: &strata_config::StorageSection) -> Self {
        Self {
            memory_ceiling: section.memory_ceiling_bytes,
            sync_ceiling: section.sync_ceiling_bytes,
            upgrade_threshold: section.upgrade_threshold_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let budget = SizeBudget::default();
        assert_eq!(budget.memory_ceiling, 10_485_760);
        assert_eq!(budget.sync_ceiling, 5_242_880);
        assert_eq!(budget.upgrade_threshold, 1_048_576);
    }

    #[test]
    fn test_builder() {
        let budget = SizeBudget::default()
            .with_sync_ceiling(5_000_000)
            .with_upgrade_threshold(1_000_000);
        assert_eq!(budget.sync_ceiling, 5_000_000);
        assert_eq!(budget.upgrade_threshold, 1_000_000);
        assert_eq!(budget.memory_ceiling, DEFAULT_MEMORY_CEILING);
    }
}
