//! Tracing Infrastructure
//!
//! Structured logging for the recorder, built on `tracing` and `tracing-subscriber`.
//! The `[application]` config section picks the level, the output format and
//! whether lines carry their source location. `RUST_LOG`, when set, replaces the
//! configured level with a full filter directive.
//!
//! # Example
//! ```no_run
//! use mocap_recorder::{config::RecorderConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RecorderConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!(period_ms = config.acquisition.sample_period_ms, "Recorder started");
//! # Ok(())
//! # }
//! ```

use crate::config::RecorderConfig;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Multi-line, colored (for development)
    Pretty,
    /// One line per event, no colors (for the device console)
    Compact,
    /// One JSON object per event (for log collection)
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Invalid log_format '{s}'. Must be one of: compact, pretty, json"
            )),
        }
    }
}

/// Subscriber settings resolved from the recorder configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Whether to include file and line numbers
    pub source_location: bool,
}

impl TracingConfig {
    /// Resolve the `[application]` logging keys
    pub fn from_recorder_config(config: &RecorderConfig) -> Result<Self, String> {
        let app = &config.application;
        let level = Level::from_str(&app.log_level)
            .map_err(|_| format!("Invalid log_level '{}'", app.log_level))?;
        Ok(Self {
            level,
            format: app.log_format.parse()?,
            source_location: app.log_source_location,
        })
    }
}

/// Initialize tracing from the recorder configuration
pub fn init_from_config(config: &RecorderConfig) -> Result<(), String> {
    init(TracingConfig::from_recorder_config(config)?)
}

/// Install the global subscriber.
///
/// Returns `Ok(())` when a subscriber is already installed, so tests and
/// several entry points may all call it.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_ascii_lowercase()));

    let base = fmt::layer()
        .with_file(config.source_location)
        .with_line_number(config.source_location)
        .with_thread_names(true);

    let layer = match config.format {
        OutputFormat::Pretty => base.pretty().with_filter(filter).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).with_filter(filter).boxed(),
        OutputFormat::Json => base.json().with_filter(filter).boxed(),
    };

    match tracing_subscriber::registry().with(layer).try_init() {
        Ok(()) => Ok(()),
        Err(_) if tracing::dispatcher::has_been_set() => Ok(()),
        Err(e) => Err(format!("Failed to initialize tracing: {e}")),
    }
}
