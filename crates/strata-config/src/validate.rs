//! Post-merge configuration validation.
//!
//! Validates that deserialized [`Config`](crate::Config) values are within
//! acceptable ranges and that cross-field invariants hold.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_storage(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: String) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message,
    }
}

fn validate_storage(config: &Config) -> ConfigResult<()> {
    let s = &config.storage;

    for (field, value) in [
        ("storage.memory_ceiling_bytes", s.memory_ceiling_bytes),
        ("storage.sync_ceiling_bytes", s.sync_ceiling_bytes),
        ("storage.upgrade_threshold_bytes", s.upgrade_threshold_bytes),
    ] {
        if value == 0 {
            return Err(invalid(field, "must be greater than 0".to_owned()));
        }
    }

    if s.upgrade_threshold_bytes > s.sync_ceiling_bytes {
        return Err(invalid(
            "storage.upgrade_threshold_bytes",
            format!(
                "threshold {} exceeds the synchronous ceiling {}",
                s.upgrade_threshold_bytes, s.sync_ceiling_bytes
            ),
        ));
    }

    if s.database_name.trim().is_empty() {
        return Err(invalid(
            "storage.database_name",
            "must not be empty".to_owned(),
        ));
    }

    if s.database_version == 0 {
        return Err(invalid(
            "storage.database_version",
            "schema versions start at 1".to_owned(),
        ));
    }

    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json", "full"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    Ok(())
}
