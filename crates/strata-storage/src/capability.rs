//! Host capability probes.
//!
//! The engine never inspects its environment. Whoever builds a
//! [`Strata`](crate::Strata) answers these questions once, and the answers
//! decide which tiers get wired.

/// Environment facts supplied by the host.
pub trait CapabilityProbe: Send + Sync {
    /// Whether an asynchronous document store can be used.
    fn is_async_store_supported(&self) -> bool;

    /// Whether a primary synchronous store can be used.
    fn is_sync_store_supported(&self) -> bool;

    /// Whether the host has effectively unlimited synchronous capacity
    /// (for example a native app shell). Such hosts never upgrade on
    /// aggregate size.
    fn is_unbounded_host_platform(&self) -> bool;
}

/// Fixed capability answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    /// Answer for [`CapabilityProbe::is_async_store_supported`].
    pub async_store: bool,
    /// Answer for [`CapabilityProbe::is_sync_store_supported`].
    pub sync_store: bool,
    /// Answer for [`CapabilityProbe::is_unbounded_host_platform`].
    pub unbounded_host: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self {
            async_store: true,
            sync_store: true,
            unbounded_host: false,
        }
    }
}

impl HostCapabilities {
    /// A host with only the fallback store.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            async_store: false,
            sync_store: false,
            unbounded_host: false,
        }
    }

    /// Set whether the document store is available.
    #[must_use]
    pub fn with_async_store(mut self, supported: bool) -> Self {
        self.async_store = supported;
        self
    }

    /// Set whether the primary synchronous store is available.
    #[must_use]
    pub fn with_sync_store(mut self, supported: bool) -> Self {
        self.sync_store = supported;
        self
    }

    /// Mark the host as having unbounded synchronous capacity.
    #[must_use]
    pub fn with_unbounded_host(mut self, unbounded: bool) -> Self {
        self.unbounded_host = unbounded;
        self
    }
}

impl CapabilityProbe for HostCapabilities {
    fn is_async_store_supported(&self) -> bool {
        self.async_store
    }

    fn is_sync_store_supported(&self) -> bool {
        self.sync_store
    }

    fn is_unbounded_host_platform(&self) -> bool {
        self.unbounded_host
    }
}
