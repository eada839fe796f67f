//! Environment variable fallbacks.
//!
//! Env vars are **fallback**, not override: they only apply to fields that no
//! config file set. Embedded defaults do not count as set.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::merge::{ConfigLayer, FieldSources};

/// Mapping from environment variable name to config field path.
struct EnvMapping {
    var_name: &'static str,
    field_path: &'static str,
    kind: FieldKind,
}

#[derive(Clone, Copy)]
enum FieldKind {
    Integer,
    Boolean,
    Text,
}

/// All supported `STRATA_*` env var mappings.
const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "STRATA_MEMORY_CEILING_BYTES",
        field_path: "storage.memory_ceiling_bytes",
        kind: FieldKind::Integer,
    },
    EnvMapping {
        var_name: "STRATA_SYNC_CEILING_BYTES",
        field_path: "storage.sync_ceiling_bytes",
        kind: FieldKind::Integer,
    },
    EnvMapping {
        var_name: "STRATA_UPGRADE_THRESHOLD_BYTES",
        field_path: "storage.upgrade_threshold_bytes",
        kind: FieldKind::Integer,
    },
    EnvMapping {
        var_name: "STRATA_ASYNC_STORE",
        field_path: "storage.async_store",
        kind: FieldKind::Boolean,
    },
    EnvMapping {
        var_name: "STRATA_SYNC_STORE",
        field_path: "storage.sync_store",
        kind: FieldKind::Boolean,
    },
    EnvMapping {
        var_name: "STRATA_UNBOUNDED_HOST",
        field_path: "storage.unbounded_host",
        kind: FieldKind::Boolean,
    },
    EnvMapping {
        var_name: "STRATA_DATABASE_NAME",
        field_path: "storage.database_name",
        kind: FieldKind::Text,
    },
    EnvMapping {
        var_name: "STRATA_DATABASE_VERSION",
        field_path: "storage.database_version",
        kind: FieldKind::Integer,
    },
    EnvMapping {
        var_name: "STRATA_SYNC_PATH",
        field_path: "storage.sync_path",
        kind: FieldKind::Text,
    },
    EnvMapping {
        var_name: "STRATA_DOCUMENT_PATH",
        field_path: "storage.document_path",
        kind: FieldKind::Text,
    },
    EnvMapping {
        var_name: "STRATA_LOG_LEVEL",
        field_path: "logging.level",
        kind: FieldKind::Text,
    },
    EnvMapping {
        var_name: "STRATA_LOG_FORMAT",
        field_path: "logging.format",
        kind: FieldKind::Text,
    },
];

/// Apply environment variable fallbacks to fields that were **not** set by
/// any config file layer.
///
/// Returns the number of env vars applied.
pub fn apply_env_fallbacks<S: ::std::hash::BuildHasher>(
    merged: &mut toml::Value,
    sources: &mut FieldSources,
    env_vars: &HashMap<String, String, S>,
) -> usize {
    let mut count: usize = 0;

    for mapping in ENV_MAPPINGS {
        let set_by_file = sources
            .get(mapping.field_path)
            .is_some_and(|layer| *layer != ConfigLayer::Defaults);
        if set_by_file {
            continue;
        }

        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };
        let Some(value) = coerce(mapping.kind, raw) else {
            warn!(
                var = mapping.var_name,
                value = raw.as_str(),
                "ignoring env var with unparseable value"
            );
            continue;
        };

        debug!(
            var = mapping.var_name,
            field = mapping.field_path,
            "applying env var fallback"
        );
        set_field(merged, mapping.field_path, value);
        sources.insert(mapping.field_path.to_owned(), ConfigLayer::Environment);
        count = count.saturating_add(1);
    }

    count
}

fn coerce(kind: FieldKind, raw: &str) -> Option<toml::Value> {
    match kind {
        FieldKind::Integer => raw.trim().parse::<i64>().ok().map(toml::Value::Integer),
        FieldKind::Boolean => raw.trim().parse::<bool>().ok().map(toml::Value::Boolean),
        FieldKind::Text => Some(toml::Value::String(raw.to_owned())),
    }
}

/// Set a dotted `path` in the TOML tree, creating intermediate tables.
fn set_field(root: &mut toml::Value, path: &str, value: toml::Value) {
    let Some((parents, leaf)) = path.rsplit_once('.') else {
        if let Some(table) = root.as_table_mut() {
            table.insert(path.to_owned(), value);
        }
        return;
    };

    let mut current = root;
    for segment in parents.split('.') {
        let Some(table) = current.as_table_mut() else {
            return;
        };
        current = table
            .entry(segment)
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    if let Some(table) = current.as_table_mut() {
        table.insert(leaf.to_owned(), value);
    }
}

/// Collect all current environment variables into a map.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars().collect()
}
