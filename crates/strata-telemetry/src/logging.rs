//! Logging configuration and setup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::error::{TelemetryError, TelemetryResult};

/// Boxed formatting layer over the base registry.
type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human-oriented output.
    Pretty,
    /// Single-line output.
    #[default]
    Compact,
    /// Newline-delimited JSON.
    Json,
    /// Default `tracing` full format.
    Full,
}

impl LogFormat {
    /// Parse a format name as written in configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::UnknownFormat`] for unknown names.
    pub fn parse(name: &str) -> TelemetryResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            "full" => Ok(Self::Full),
            other => Err(TelemetryError::UnknownFormat(other.to_owned())),
        }
    }
}

/// Where log lines are written.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Standard output.
    Stdout,
    /// Standard error.
    #[default]
    Stderr,
    /// Rolling files in a directory.
    File(PathBuf),
}

/// Rotation period for file output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    /// New file every day.
    #[default]
    Daily,
    /// New file every hour.
    Hourly,
    /// Single file, never rotated.
    Never,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Base level filter (`"info"`, `"debug"`, or a full filter expression).
    pub level: String,
    /// Output format.
    pub format: LogFormat,
    /// Output target.
    pub target: LogTarget,
    /// Rotation for [`LogTarget::File`].
    pub rotation: FileRotation,
    /// File name prefix for [`LogTarget::File`].
    pub file_prefix: String,
    /// Include timestamps.
    pub timestamps: bool,
    /// Include source file and line.
    pub file_info: bool,
    /// Emit span open/close events.
    pub span_events: bool,
    /// Use ANSI colors (ignored for file output).
    pub ansi: bool,
    /// Extra per-target directives, e.g. `strata_storage=debug`.
    pub directives: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            rotation: FileRotation::default(),
            file_prefix: "strata".to_owned(),
            timestamps: true,
            file_info: false,
            span_events: false,
            ansi: true,
            directives: Vec::new(),
        }
    }
}

impl LogConfig {
    /// Create a config with the given base level.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the output target.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Write rolling files into `directory`.
    #[must_use]
    pub fn with_file_output(
        mut self,
        directory: impl Into<PathBuf>,
        rotation: FileRotation,
    ) -> Self {
        self.target = LogTarget::File(directory.into());
        self.rotation = rotation;
        self
    }

    /// Add a per-target directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Disable timestamps.
    #[must_use]
    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self
    }

    /// Include source file and line numbers.
    #[must_use]
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Emit span open/close events.
    #[must_use]
    pub fn with_span_events(mut self) -> Self {
        self.span_events = true;
        self
    }

    /// Disable ANSI colors.
    #[must_use]
    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }

    /// Build the [`EnvFilter`] for this config.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::InvalidFilter`] if the level or any directive
    /// does not parse.
    pub fn build_filter(&self) -> TelemetryResult<EnvFilter> {
        let mut filter = EnvFilter::try_new(&self.level).map_err(|e| {
            TelemetryError::InvalidFilter(format!("level '{}': {e}", self.level))
        })?;

        for directive in &self.directives {
            let parsed = directive.parse().map_err(|e| {
                TelemetryError::InvalidFilter(format!("directive '{directive}': {e}"))
            })?;
            filter = filter.add_directive(parsed);
        }

        Ok(filter)
    }
}

#[cfg(feature = "config")]
impl TryFrom<&strata_config::LoggingSection> for LogConfig {
    type Error = TelemetryError;

    fn try_from(section: &strata_config::LoggingSection) -> TelemetryResult<Self> {
        Ok(Self {
            level: section.level.clone(),
            format: LogFormat::parse(&section.format)?,
            directives: section.directives.clone(),
            ..Self::default()
        })
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns an error if the filter is invalid, the log directory cannot be
/// created, or a global subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    let filter = config.build_filter()?;
    let layer = build_layer(config)?;

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| TelemetryError::AlreadyInitialized(e.to_string()))
}

/// Install a compact stderr subscriber at `info`, honoring `RUST_LOG`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_default_logging() -> TelemetryResult<()> {
    let mut config = LogConfig::default();
    if let Ok(level) = std::env::var("RUST_LOG")
        && !level.trim().is_empty()
    {
        config.level = level;
    }
    setup_logging(&config)
}

fn build_layer(config: &LogConfig) -> TelemetryResult<BoxedLayer> {
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_file(config.file_info)
        .with_line_number(config.file_info)
        .with_span_events(span_events);

    let layer: BoxedLayer = match &config.target {
        LogTarget::Stdout => {
            format_layer(base.with_ansi(config.ansi).with_writer(std::io::stdout), config)
        },
        LogTarget::Stderr => {
            format_layer(base.with_ansi(config.ansi).with_writer(std::io::stderr), config)
        },
        LogTarget::File(directory) => {
            std::fs::create_dir_all(directory).map_err(|source| {
                TelemetryError::LogDirectory {
                    path: directory.clone(),
                    source,
                }
            })?;
            let appender = rolling_appender(directory, &config.file_prefix, config.rotation);
            format_layer(base.with_ansi(false).with_writer(appender), config)
        },
    };

    Ok(layer)
}

fn format_layer<W>(
    layer: fmt::Layer<Registry, fmt::format::DefaultFields, fmt::format::Format, W>,
    config: &LogConfig,
) -> BoxedLayer
where
    W: for<'w> fmt::MakeWriter<'w> + Send + Sync + 'static,
{
    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => Box::new(layer.pretty()),
        (LogFormat::Pretty, false) => Box::new(layer.pretty().without_time()),
        (LogFormat::Compact, true) => Box::new(layer.compact()),
        (LogFormat::Compact, false) => Box::new(layer.compact().without_time()),
        (LogFormat::Json, true) => Box::new(layer.json()),
        (LogFormat::Json, false) => Box::new(layer.json().without_time()),
        (LogFormat::Full, true) => Box::new(layer),
        (LogFormat::Full, false) => Box::new(layer.without_time()),
    }
}

fn rolling_appender(
    directory: &std::path::Path,
    prefix: &str,
    rotation: FileRotation,
) -> tracing_appender::rolling::RollingFileAppender {
    match rotation {
        FileRotation::Daily => tracing_appender::rolling::daily(directory, prefix),
        FileRotation::Hourly => tracing_appender::rolling::hourly(directory, prefix),
        FileRotation::Never => tracing_appender::rolling::never(directory, prefix),
    }
}
