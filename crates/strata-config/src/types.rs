//! Configuration types.
//!
//! Every struct implements [`Default`] with the same values as the embedded
//! `defaults.toml`, so a bare `[section]` header in TOML produces a working
//! configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tier ceilings, capabilities and backend locations.
    pub storage: StorageSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// StorageSection
// ---------------------------------------------------------------------------

/// Storage tier configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Advisory ceiling for the memory tier, in estimated bytes.
    pub memory_ceiling_bytes: usize,
    /// Aggregate ceiling for the synchronous tier, in estimated bytes.
    pub sync_ceiling_bytes: usize,
    /// Single-value size above which a cache write is upgraded to the
    /// document store.
    pub upgrade_threshold_bytes: usize,
    /// Whether the document store is available.
    pub async_store: bool,
    /// Whether a primary synchronous store is available.
    pub sync_store: bool,
    /// Whether the host has unbounded synchronous capacity.
    pub unbounded_host: bool,
    /// Document database name.
    pub database_name: String,
    /// Schema version requested on first open.
    pub database_version: u32,
    /// JSON file backing the primary synchronous tier. `None` keeps it in
    /// memory.
    pub sync_path: Option<PathBuf>,
    /// Directory backing the document store (requires the storage crate's
    /// `kv` feature). `None` keeps it in memory.
    pub document_path: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            memory_ceiling_bytes: 10_485_760,
            sync_ceiling_bytes: 5_242_880,
            upgrade_threshold_bytes: 1_048_576,
            async_store: true,
            sync_store: true,
            unbounded_host: false,
            database_name: "strata".to_owned(),
            database_version: 1,
            sync_path: None,
            document_path: None,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"`, or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["strata_storage=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}
