//! Storage error types.

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A storage operation failed.
    #[error("storage error: {0}")]
    Internal(String),

    /// Connection to the storage backend failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// The held connection no longer matches the backend's live generation.
    ///
    /// The document store recovers from this by reopening once.
    #[error("stale connection: {0}")]
    StaleConnection(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A database or container name cannot be represented by the backend.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The named container does not exist in the current schema.
    #[error("unknown container: {0}")]
    UnknownContainer(String),

    /// An open request asked for an older schema version than the stored one.
    #[error("version conflict: requested {requested}, stored {current}")]
    VersionConflict {
        /// Version passed to the open request.
        requested: u32,
        /// Version currently stored by the backend.
        current: u32,
    },
}

impl StorageError {
    /// Whether this error means the connection must be reopened.
    #[must_use]
    pub fn is_stale_connection(&self) -> bool {
        matches!(self, Self::StaleConnection(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
