//! # conduit-telemetry
//!
//! Installs the global `tracing` subscriber: an [`EnvFilter`] built from the
//! configured level (overridden by `RUST_LOG`) feeding a JSON or pretty `fmt`
//! layer on stderr.

#![deny(unsafe_code)]

use conduit_settings::LoggingSettings;
use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `conduit_exec` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from the logging section of the settings. An unparseable level
    /// falls back to INFO.
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            log_level: settings.level.parse().unwrap_or(Level::INFO),
            module_levels: Vec::new(),
            json: settings.json,
        }
    }

    /// Directive string for [`EnvFilter`], e.g. `info,conduit_exec=debug`.
    pub fn filter_directives(&self) -> String {
        let mut filter = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter.push(',');
            filter.push_str(module);
            filter.push('=');
            filter.push_str(&level.to_string().to_lowercase());
        }
        filter
    }
}

/// Initialize the global subscriber. Call once at startup.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_telemetry(config: &TelemetryConfig) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directives()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(env_filter)
            .boxed()
    };

    tracing_subscriber::registry().with(fmt_layer).try_init().is_ok()
}
