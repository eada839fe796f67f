//! Config file discovery and layered loading.
//!
//! Implements the `Config::load()` algorithm:
//! 1. Parse `defaults.toml` → base
//! 2. Merge `~/.strata/config.toml` (user)
//! 3. Merge the explicitly requested file, if any
//! 4. Apply env var fallbacks for fields no file set
//! 5. Deserialize merged tree → `Config`
//! 6. Validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::{ConfigLayer, FieldSources, deep_merge_tracking, record_leaves};
use crate::types::Config;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1_048_576;

/// A loaded configuration with the provenance of each field.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The validated configuration.
    pub config: Config,
    /// Layer that set each leaf field.
    pub field_sources: FieldSources,
    /// Files merged, in order.
    pub loaded_files: Vec<String>,
}

/// Load configuration from the process environment.
///
/// `explicit` is merged above the user file. `strata_home_override` is used
/// as the `.strata` directory instead of `~/.strata`.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, or if the
/// final merged configuration fails validation.
pub fn load(
    explicit: Option<&Path>,
    strata_home_override: Option<&Path>,
) -> ConfigResult<ResolvedConfig> {
    let strata_home = match strata_home_override {
        Some(h) => h.to_path_buf(),
        None => home_directory()?.join(".strata"),
    };
    load_with_env(explicit, &strata_home, &collect_env_vars())
}

/// Load configuration against an explicit `.strata` directory and
/// environment map.
///
/// # Errors
///
/// Returns a [`ConfigError`] if any config file is malformed, or if the
/// final merged configuration fails validation.
pub fn load_with_env<S: ::std::hash::BuildHasher>(
    explicit: Option<&Path>,
    strata_home: &Path,
    env_vars: &HashMap<String, String, S>,
) -> ConfigResult<ResolvedConfig> {
    // 1. Embedded defaults.
    let mut merged: toml::Value =
        toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
            path: "<embedded defaults>".to_owned(),
            source: e,
        })?;
    let mut field_sources = FieldSources::new();
    let mut loaded_files = Vec::new();
    record_leaves(&merged, "", ConfigLayer::Defaults, &mut field_sources);

    // 2. User config.
    let user_path = strata_home.join("config.toml");
    if let Some(overlay) = try_load_file(&user_path)? {
        deep_merge_tracking(&mut merged, &overlay, "", ConfigLayer::User, &mut field_sources);
        loaded_files.push(user_path.display().to_string());
        info!(path = %user_path.display(), "loaded user config");
    }

    // 3. Explicit file. Unlike the user file it must exist.
    if let Some(path) = explicit {
        let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        deep_merge_tracking(&mut merged, &overlay, "", ConfigLayer::File, &mut field_sources);
        loaded_files.push(path.display().to_string());
        info!(path = %path.display(), "loaded config file");
    }

    // 4. Env var fallbacks.
    let env_count = apply_env_fallbacks(&mut merged, &mut field_sources, env_vars);
    if env_count > 0 {
        debug!(count = env_count, "applied environment variable fallbacks");
    }

    // 5. Deserialize.
    let config: Config =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;

    // 6. Validate.
    validate::validate(&config)?;

    Ok(ResolvedConfig {
        config,
        field_sources,
        loaded_files,
    })
}

/// Load a config from a specific file path (no layering, no env).
///
/// Missing sections and fields take their defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read, parsed, or
/// validated.
pub fn load_file(path: &Path) -> ConfigResult<Config> {
    let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
        path: path.display().to_string(),
        source: std::io::Error::from(std::io::ErrorKind::NotFound),
    })?;
    let config: Config = overlay
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::ParseError {
            path: path.display().to_string(),
            source: e,
        })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Try to load a file, returning `None` if the file doesn't exist.
///
/// Uses a single read operation to avoid TOCTOU races (no separate
/// exists/metadata checks before reading).
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() as u64 > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {} byte limit",
                content.len(),
                MAX_CONFIG_FILE_SIZE
            ),
        });
    }

    let value: toml::Value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;

    Ok(Some(value))
}

/// Determine the user's home directory.
fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_defaults_only() {
        let home = tempfile::tempdir().unwrap();
        let resolved = load_with_env(None, home.path(), &no_env()).unwrap();
        assert_eq!(resolved.config, Config::default());
        assert!(resolved.loaded_files.is_empty());
        assert_eq!(
            resolved.field_sources["storage.sync_ceiling_bytes"],
            ConfigLayer::Defaults
        );
    }

    #[test]
    fn test_user_then_explicit_precedence() {
        let home = tempfile::tempdir().unwrap();
        write(
            home.path(),
            "config.toml",
            "[storage]\nsync_ceiling_bytes = 2000000\ndatabase_name = \"user-db\"",
        );
        let other = tempfile::tempdir().unwrap();
        let explicit = write(other.path(), "app.toml", "[storage]\ndatabase_name = \"app-db\"");

        let resolved = load_with_env(Some(&explicit), home.path(), &no_env()).unwrap();
        assert_eq!(resolved.config.storage.sync_ceiling_bytes, 2_000_000);
        assert_eq!(resolved.config.storage.database_name, "app-db");
        assert_eq!(resolved.loaded_files.len(), 2);
        assert_eq!(
            resolved.field_sources["storage.database_name"],
            ConfigLayer::File
        );
    }

    #[test]
    fn test_env_fills_only_unset_fields() {
        let home = tempfile::tempdir().unwrap();
        write(home.path(), "config.toml", "[logging]\nlevel = \"warn\"");
        let env: HashMap<String, String> = [
            ("STRATA_LOG_LEVEL", "trace"),
            ("STRATA_UNBOUNDED_HOST", "true"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect();

        let resolved = load_with_env(None, home.path(), &env).unwrap();
        assert_eq!(resolved.config.logging.level, "warn");
        assert!(resolved.config.storage.unbounded_host);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let home = tempfile::tempdir().unwrap();
        let err = load_with_env(Some(Path::new("/nonexistent/strata.toml")), home.path(), &no_env())
            .unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_malformed_file_reports_path() {
        let home = tempfile::tempdir().unwrap();
        write(home.path(), "config.toml", "[storage\nbroken");
        let err = load_with_env(None, home.path(), &no_env()).unwrap_err();
        match err {
            ConfigError::ParseError { path, .. } => assert!(path.ends_with("config.toml")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_invalid_merged_config_rejected() {
        let home = tempfile::tempdir().unwrap();
        write(home.path(), "config.toml", "[storage]\nupgrade_threshold_bytes = 99999999");
        let err = load_with_env(None, home.path(), &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_oversized_file_rejected() {
        let home = tempfile::tempdir().unwrap();
        let padding = "#".repeat(1_048_577);
        write(home.path(), "config.toml", &padding);
        let err = load_with_env(None, home.path(), &no_env()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_load_file_without_layers() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "only.toml",
            "[storage]\nsync_path = \"/tmp/strata-sync.json\"\n[logging]\nformat = \"json\"",
        );
        let config = load_file(&path).unwrap();
        assert_eq!(
            config.storage.sync_path.as_deref(),
            Some(Path::new("/tmp/strata-sync.json"))
        );
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.storage.database_version, 1);
    }
}
