//! Strata Telemetry: logging setup for the Strata storage stack.
//!
//! Storage operations report through `tracing` with structured fields
//! (`key`, `tier`, `bytes`, `container`). This crate installs the
//! subscriber that renders them.
//!
//! # Example
//!
//! ```rust,no_run
//! use strata_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), strata_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_directive("strata_storage=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("storage ready");
//! # Ok(())
//! # }
//! ```
//!
//! With the `config` feature, a [`LogConfig`] can be built from the
//! `[logging]` section of a `strata-config` file.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging,
};
