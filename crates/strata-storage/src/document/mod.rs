//! Asynchronous versioned document tier.
//!
//! A [`DocumentBackend`] is a database with named containers and an integer
//! schema version. Opening it with a higher version applies a
//! [`SchemaUpgrade`] and invalidates every connection opened before: those
//! connections report [`StorageError::StaleConnection`] from then on.
//!
//! [`AsyncDocumentStore`] owns the single live connection:
//!
//! ```text
//! Closed ──open()──▶ Opening ──ok──▶ Open ──close() / stale──▶ Closed
//!                       └──err──▶ Closed
//! ```
//!
//! Opens are serialized behind an async mutex, so concurrent first use
//! creates the required containers exactly once. Data operations reopen and
//! retry exactly once on a stale connection; any other failure is logged and
//! resolved to a neutral value (`None`, an empty list, or `()`).
//!
//! Implementations:
//!
//! - [`MemoryDocumentBackend`] (always available)
//! - `SurrealKvDocumentBackend` (behind the `kv` feature)

mod memory;
#[cfg(feature = "kv")]
mod surreal;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::events::{SharedSink, StorageEvent, Tier, null_sink};

pub use memory::MemoryDocumentBackend;
#[cfg(feature = "kv")]
pub use surreal::SurrealKvDocumentBackend;

/// Default database name.
pub const DEFAULT_DATABASE_NAME: &str = "strata";

/// Default schema version requested on first open.
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// Container holding promoted cache entries.
pub const GLOBAL_CONTAINER: &str = "globalData";

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

/// Container changes applied when an open bumps the schema version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaUpgrade {
    /// Containers to create if missing.
    pub create: Vec<String>,
    /// Containers to drop if present.
    pub delete: Vec<String>,
}

impl SchemaUpgrade {
    /// An upgrade that creates `containers`.
    #[must_use]
    pub fn create<I, S>(containers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            create: containers.into_iter().map(Into::into).collect(),
            delete: Vec::new(),
        }
    }

    /// An upgrade that drops `containers`.
    #[must_use]
    pub fn delete<I, S>(containers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            create: Vec::new(),
            delete: containers.into_iter().map(Into::into).collect(),
        }
    }
}

/// A versioned database with named containers.
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Open a connection to database `name`.
    ///
    /// - Database absent: it is created at `version` (or 1) and `upgrade`
    ///   is applied.
    /// - `version` above the stored version: `upgrade` is applied, the stored
    ///   version moves up, and older connections become stale.
    /// - `version` equal or `None`: a plain open.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::VersionConflict`] if `version` is below the
    /// stored version, or [`StorageError::Connection`] if the backend is
    /// unreachable.
    async fn open(
        &self,
        name: &str,
        version: Option<u32>,
        upgrade: &SchemaUpgrade,
    ) -> StorageResult<Arc<dyn DocumentConnection>>;
}

/// A live connection to one database generation.
///
/// Every data method returns [`StorageError::StaleConnection`] once the
/// connection is closed or the database has moved to a newer version.
#[async_trait]
pub trait DocumentConnection: Send + Sync {
    /// Schema version this connection was opened at.
    fn version(&self) -> u32;

    /// Containers present in this connection's schema.
    fn container_names(&self) -> Vec<String>;

    /// Store `value` under `key`, overwriting.
    async fn put(&self, container: &str, key: &str, value: Value) -> StorageResult<()>;

    /// Get the value under `key`.
    async fn get(&self, container: &str, key: &str) -> StorageResult<Option<Value>>;

    /// Delete `key`. Deleting a missing key is not an error.
    async fn delete(&self, container: &str, key: &str) -> StorageResult<()>;

    /// Delete every key in `container`.
    async fn clear(&self, container: &str) -> StorageResult<()>;

    /// Every value in `container`, in key order.
    async fn get_all(&self, container: &str) -> StorageResult<Vec<Value>>;

    /// Release the connection. Later calls report a stale connection.
    fn close(&self);
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Observable state of the store's connection handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection held.
    Closed,
    /// An open request is in flight.
    Opening,
    /// A connection is held and reused.
    Open,
}

impl ConnectionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Opening,
            2 => Self::Open,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Opening => 1,
            Self::Open => 2,
        }
    }
}

struct Handle {
    conn: Option<Arc<dyn DocumentConnection>>,
    /// Version to request on the next open; tracks the newest version seen.
    version: u32,
}

/// How a data operation failed.
enum Failure {
    /// First-attempt failure that is not a stale connection.
    Recoverable(StorageError),
    /// The retry after a reopen failed too.
    Exhausted(StorageError),
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Owner of the single connection to a [`DocumentBackend`].
pub struct AsyncDocumentStore {
    backend: Arc<dyn DocumentBackend>,
    name: String,
    required: Vec<String>,
    handle: Mutex<Handle>,
    state: AtomicU8,
    sink: SharedSink,
}

impl std::fmt::Debug for AsyncDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncDocumentStore")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl AsyncDocumentStore {
    /// Create a closed store for database `name` at the default version,
    /// requiring the [`GLOBAL_CONTAINER`].
    #[must_use]
    pub fn new(backend: Arc<dyn DocumentBackend>, name: impl Into<String>) -> Self {
        Self {
            backend,
            name: name.into(),
            required: vec![GLOBAL_CONTAINER.to_owned()],
            handle: Mutex::new(Handle {
                conn: None,
                version: DEFAULT_SCHEMA_VERSION,
            }),
            state: AtomicU8::new(ConnectionState::Closed.as_u8()),
            sink: null_sink(),
        }
    }

    /// Request `version` on first open instead of the default.
    #[must_use]
    pub fn with_version(self, version: u32) -> Self {
        let mut handle = self.handle.into_inner();
        handle.version = version.max(1);
        Self {
            handle: Mutex::new(handle),
            ..self
        }
    }

    /// Route diagnostics to `sink`.
    #[must_use]
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    // -- Connection lifecycle --

    /// Ensure a connection is open and return it.
    ///
    /// Returns the held connection immediately when already open.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the connection cannot be opened.
    pub async fn open(&self) -> StorageResult<Arc<dyn DocumentConnection>> {
        let mut handle = self.handle.lock().await;
        self.open_locked(&mut handle).await
    }

    /// Release the connection. The next operation reopens transparently.
    pub async fn close(&self) {
        let mut handle = self.handle.lock().await;
        self.close_locked(&mut handle);
    }

    async fn open_locked(
        &self,
        handle: &mut MutexGuard<'_, Handle>,
    ) -> StorageResult<Arc<dyn DocumentConnection>> {
        if let Some(conn) = &handle.conn {
            return Ok(Arc::clone(conn));
        }

        self.set_state(ConnectionState::Opening);
        match self.connect(handle).await {
            Ok(conn) => {
                handle.version = conn.version();
                handle.conn = Some(Arc::clone(&conn));
                self.set_state(ConnectionState::Open);
                info!(database = %self.name, version = conn.version(), "document store opened");
                self.sink.emit(&StorageEvent::ConnectionOpened {
                    version: conn.version(),
                });
                Ok(conn)
            },
            Err(e) => {
                self.set_state(ConnectionState::Closed);
                Err(e)
            },
        }
    }

    /// Open at the tracked version, then make sure the required containers
    /// exist, bumping the version once if any are missing.
    async fn connect(&self, handle: &Handle) -> StorageResult<Arc<dyn DocumentConnection>> {
        let upgrade = SchemaUpgrade::create(self.required.iter().cloned());
        let conn = match self
            .backend
            .open(&self.name, Some(handle.version), &upgrade)
            .await
        {
            Err(StorageError::VersionConflict { requested, current }) => {
                debug!(
                    database = %self.name,
                    requested,
                    current,
                    "stored schema is newer, opening at stored version"
                );
                self.backend
                    .open(&self.name, Some(current), &upgrade)
                    .await?
            },
            other => other?,
        };

        let present = conn.container_names();
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|c| !present.contains(c))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(conn);
        }

        let next = conn.version().saturating_add(1);
        conn.close();
        debug!(database = %self.name, ?missing, version = next, "creating required containers");
        self.backend
            .open(&self.name, Some(next), &SchemaUpgrade::create(missing))
            .await
    }

    fn close_locked(&self, handle: &mut Handle) {
        if let Some(conn) = handle.conn.take() {
            conn.close();
            debug!(database = %self.name, "document store closed");
            self.sink.emit(&StorageEvent::ConnectionClosed);
        }
        self.set_state(ConnectionState::Closed);
    }

    // -- Retry machinery --

    /// Run `op` on the live connection, reopening and retrying once if the
    /// connection turns out to be stale.
    async fn run<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, Failure>
    where
        F: Fn(Arc<dyn DocumentConnection>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let conn = self.open().await.map_err(Failure::Recoverable)?;
        match op(Arc::clone(&conn)).await {
            Ok(value) => Ok(value),
            Err(e) if e.is_stale_connection() => {
                warn!(
                    database = %self.name,
                    operation,
                    error = %e,
                    "document store connection was closed, reopening"
                );
                self.sink.emit(&StorageEvent::StaleConnection { operation });
                let conn = self
                    .reopen_after_stale(&conn)
                    .await
                    .map_err(Failure::Exhausted)?;
                op(conn).await.map_err(Failure::Exhausted)
            },
            Err(e) => Err(Failure::Recoverable(e)),
        }
    }

    /// Replace `failed` with a fresh connection.
    ///
    /// Another task may have reopened while `failed` was in use; its
    /// connection is reused rather than closed.
    async fn reopen_after_stale(
        &self,
        failed: &Arc<dyn DocumentConnection>,
    ) -> StorageResult<Arc<dyn DocumentConnection>> {
        let mut handle = self.handle.lock().await;
        if handle
            .conn
            .as_ref()
            .is_some_and(|held| Arc::ptr_eq(held, failed))
        {
            self.close_locked(&mut handle);
        }
        self.open_locked(&mut handle).await
    }

    /// Resolve a first-attempt failure to `neutral`; propagate an exhausted
    /// retry.
    fn settle<T>(
        &self,
        operation: &'static str,
        result: Result<T, Failure>,
        neutral: T,
    ) -> StorageResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(Failure::Exhausted(e)) => Err(self.exhausted(operation, e)),
            Err(Failure::Recoverable(e)) => {
                self.report(operation, &e);
                Ok(neutral)
            },
        }
    }

    /// Like [`settle`](Self::settle), but every failure is returned to the
    /// caller, which owns reporting it.
    fn surface<T>(&self, operation: &'static str, result: Result<T, Failure>) -> StorageResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(Failure::Exhausted(e)) => Err(self.exhausted(operation, e)),
            Err(Failure::Recoverable(e)) => {
                warn!(
                    database = %self.name,
                    operation,
                    error = %e,
                    "document store operation failed"
                );
                Err(e)
            },
        }
    }

    fn exhausted(&self, operation: &'static str, e: StorageError) -> StorageError {
        error!(
            database = %self.name,
            operation,
            error = %e,
            "document store retry failed"
        );
        e
    }

    fn report(&self, operation: &'static str, e: &StorageError) {
        error!(
            database = %self.name,
            operation,
            error = %e,
            "document store operation failed"
        );
        self.sink.emit(&StorageEvent::BackendFailure {
            tier: Tier::Document,
            operation,
            error: e.to_string(),
        });
    }

    // -- Data operations --

    /// Store `value` under `key` in `container`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the connection was stale and the retry after
    /// reopening failed as well.
    pub async fn write(&self, container: &str, key: &str, value: Value) -> StorageResult<()> {
        let result = self
            .run("write", |conn| {
                let value = value.clone();
                async move { conn.put(container, key, value).await }
            })
            .await;
        self.settle("write", result, ())
    }

    /// Store `value` under `key` in `container`, returning every failure.
    ///
    /// Used where the caller must know the value landed before discarding
    /// other copies of it. No [`StorageEvent::BackendFailure`] is emitted.
    ///
    /// # Errors
    ///
    /// Returns the backend's error for any failure, after the usual
    /// stale-connection retry.
    pub async fn write_checked(
        &self,
        container: &str,
        key: &str,
        value: Value,
    ) -> StorageResult<()> {
        let result = self
            .run("write", |conn| {
                let value = value.clone();
                async move { conn.put(container, key, value).await }
            })
            .await;
        self.surface("write", result)
    }

    /// Read the value under `key` in `container`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the stale-connection retry failed.
    pub async fn read(&self, container: &str, key: &str) -> StorageResult<Option<Value>> {
        let result = self
            .run("read", |conn| async move { conn.get(container, key).await })
            .await;
        self.settle("read", result, None)
    }

    /// Delete `key` from `container`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the stale-connection retry failed.
    pub async fn delete(&self, container: &str, key: &str) -> StorageResult<()> {
        let result = self
            .run("delete", |conn| async move { conn.delete(container, key).await })
            .await;
        self.settle("delete", result, ())
    }

    /// Delete every key in `container`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the stale-connection retry failed.
    pub async fn clear(&self, container: &str) -> StorageResult<()> {
        let result = self
            .run("clear", |conn| async move { conn.clear(container).await })
            .await;
        self.settle("clear", result, ())
    }

    /// Every value in `container`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the stale-connection retry failed.
    pub async fn list_all(&self, container: &str) -> StorageResult<Vec<Value>> {
        let result = self
            .run("list_all", |conn| async move { conn.get_all(container).await })
            .await;
        self.settle("list_all", result, Vec::new())
    }

    /// Clear every container of the current schema.
    ///
    /// # Errors
    ///
    /// Returns an error only if the stale-connection retry failed.
    pub async fn clear_all(&self) -> StorageResult<()> {
        let result = self
            .run("clear_all", |conn| async move {
                for container in conn.container_names() {
                    conn.clear(&container).await?;
                }
                Ok::<(), StorageError>(())
            })
            .await;
        self.settle("clear_all", result, ())?;
        info!(database = %self.name, "all containers cleared");
        Ok(())
    }

    // -- Schema management --

    /// Containers in the current schema.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if the connection cannot be opened.
    pub async fn container_names(&self) -> StorageResult<Vec<String>> {
        Ok(self.open().await?.container_names())
    }

    /// Create `container` by reopening at the next schema version.
    ///
    /// Returns `false` without touching the schema if it already exists.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if reopening fails.
    pub async fn create_container(&self, container: &str) -> StorageResult<bool> {
        self.change_schema(container, true).await
    }

    /// Drop `container` by reopening at the next schema version.
    ///
    /// Returns `false` without touching the schema if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns the backend's error if reopening fails.
    pub async fn delete_container(&self, container: &str) -> StorageResult<bool> {
        self.change_schema(container, false).await
    }

    async fn change_schema(&self, container: &str, create: bool) -> StorageResult<bool> {
        let mut handle = self.handle.lock().await;
        let conn = self.open_locked(&mut handle).await?;
        let exists = conn.container_names().iter().any(|c| c == container);
        if exists == create {
            return Ok(false);
        }

        // Schema changes require releasing the current connection first.
        let next = conn.version().saturating_add(1);
        self.close_locked(&mut handle);
        let upgrade = if create {
            SchemaUpgrade::create([container])
        } else {
            SchemaUpgrade::delete([container])
        };

        self.set_state(ConnectionState::Opening);
        let conn = match self.backend.open(&self.name, Some(next), &upgrade).await {
            Ok(conn) => conn,
            Err(e) => {
                self.set_state(ConnectionState::Closed);
                return Err(e);
            },
        };
        handle.version = conn.version();
        handle.conn = Some(Arc::clone(&conn));
        self.set_state(ConnectionState::Open);

        info!(
            database = %self.name,
            container,
            create,
            version = conn.version(),
            "document schema changed"
        );
        self.sink.emit(&StorageEvent::SchemaChanged {
            container: container.to_owned(),
            created: create,
            version: conn.version(),
        });
        Ok(true)
    }

    // -- Typed convenience (JSON) --

    /// Serialize `value` and store it.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if serialization fails, or the
    /// error of [`write`](Self::write).
    pub async fn write_json<T: serde::Serialize>(
        &self,
        container: &str,
        key: &str,
        value: &T,
    ) -> StorageResult<()> {
        let value = serde_json::to_value(value)?;
        self.write(container, key, value).await
    }

    /// Read and deserialize the value under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Serialization`] if the stored value does not
    /// match `T`, or the error of [`read`](Self::read).
    pub async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        container: &str,
        key: &str,
    ) -> StorageResult<Option<T>> {
        self.read(container, key)
            .await?
            .map(|v| serde_json::from_value(v).map_err(StorageError::from))
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
