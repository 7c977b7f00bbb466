// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry initialization and configuration.

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Configuration for telemetry initialization.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Default log level if RUST_LOG is not set.
    pub default_level: Level,

    /// Whether to include span events (enter/exit).
    pub include_span_events: bool,

    /// Whether to include file/line information.
    pub include_file_line: bool,

    /// Whether to include target module path.
    pub include_target: bool,

    /// Whether to use ANSI colors in output.
    pub ansi_colors: bool,

    /// Whether to use compact log format.
    pub compact: bool,

    /// Custom filter directive (overrides default_level).
    pub filter_directive: Option<String>,

    /// Append logs to this file instead of stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            default_level: Level::INFO,
            include_span_events: false,
            include_file_line: false,
            include_target: true,
            ansi_colors: true,
            compact: true,
            filter_directive: None,
            log_file: None,
        }
    }
}

impl TelemetryConfig {
    /// Create a config suitable for development with verbose output.
    pub fn development() -> Self {
        Self {
            default_level: Level::DEBUG,
            include_span_events: true,
            include_file_line: true,
            compact: false,
            ..Default::default()
        }
    }

    /// Create a config for long-running agents under a supervisor.
    ///
    /// Agents keep `info` so lifecycle events (registration, evictions,
    /// consumer stats) stay visible.
    pub fn production() -> Self {
        Self {
            default_level: Level::INFO,
            include_target: false,
            ansi_colors: false,
            ..Default::default()
        }
    }

    /// Create a config for testing with trace-level output.
    pub fn testing() -> Self {
        Self {
            default_level: Level::TRACE,
            include_span_events: true,
            include_file_line: true,
            ansi_colors: false,
            compact: false,
            filter_directive: Some("centerfire=trace".to_string()),
            ..Default::default()
        }
    }

    /// Pick a preset from the global `--debug` flag.
    pub fn from_debug_flag(debug: bool) -> Self {
        if debug {
            Self::development()
        } else {
            Self::default()
        }
    }

    /// Set the default log level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.default_level = level;
        self
    }

    /// Set a custom filter directive.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter_directive = Some(filter.into());
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi_colors = ansi;
        self
    }

    /// Write logs to a file.
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self.ansi_colors = false;
        self
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.default_level.to_string());
        match &self.filter_directive {
            Some(directive) => EnvFilter::try_new(directive).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }
}

/// Guard that flushes telemetry on drop.
///
/// Keep this guard alive for the duration of your program.
pub struct TelemetryGuard {
    _private: (),
}

/// Initialize telemetry with the given configuration.
///
/// This should be called once at process startup. Logs go to stderr so
/// that CLI output on stdout stays machine-readable.
///
/// # Example
///
/// ```rust,ignore
/// use centerfire::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(&TelemetryConfig::production())?;
/// ```
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    let filter = config.build_filter();

    let span_events = if config.include_span_events {
        FmtSpan::ENTER | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let to_io = |e: tracing_subscriber::util::TryInitError| io::Error::new(io::ErrorKind::Other, e.to_string());

    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let fmt_layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(config.include_target)
                .with_file(config.include_file_line)
                .with_line_number(config.include_file_line)
                .with_span_events(span_events);
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .map_err(to_io)?;
        }
        None => {
            let fmt_layer = fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target)
                .with_file(config.include_file_line)
                .with_line_number(config.include_file_line)
                .with_span_events(span_events);
            if config.compact {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer.compact())
                    .try_init()
                    .map_err(to_io)?;
            } else {
                tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt_layer)
                    .try_init()
                    .map_err(to_io)?;
            }
        }
    }

    Ok(TelemetryGuard { _private: () })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.default_level, Level::INFO);
        assert!(config.ansi_colors);
        assert!(config.compact);
        assert!(config.log_file.is_none());
    }

    #[test]
    fn test_telemetry_config_development() {
        let config = TelemetryConfig::development();
        assert_eq!(config.default_level, Level::DEBUG);
        assert!(config.include_span_events);
    }

    #[test]
    fn test_telemetry_config_production_keeps_info() {
        let config = TelemetryConfig::production();
        assert_eq!(config.default_level, Level::INFO);
        assert!(!config.ansi_colors);
    }

    #[test]
    fn test_from_debug_flag() {
        assert_eq!(TelemetryConfig::from_debug_flag(true).default_level, Level::DEBUG);
        assert_eq!(TelemetryConfig::from_debug_flag(false).default_level, Level::INFO);
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::default()
            .with_level(Level::DEBUG)
            .with_filter("centerfire=trace")
            .with_log_file("/tmp/agent.log");

        assert_eq!(config.default_level, Level::DEBUG);
        assert_eq!(config.filter_directive, Some("centerfire=trace".to_string()));
        assert!(!config.ansi_colors);
    }
}
