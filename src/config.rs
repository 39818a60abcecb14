//! Recorder Configuration using Figment
//!
//! This module provides strongly-typed configuration loading for the recorder.
//! Configuration is loaded from:
//! 1. config/mocap.toml file (base configuration)
//! 2. Environment variables (prefixed with MOCAP_, `__` separates nested keys)
//!
//! Every section has defaults matching the device firmware, so an empty file is a
//! valid configuration.
//!
//! # Example
//! ```no_run
//! use mocap_recorder::config::RecorderConfig;
//!
//! let config = RecorderConfig::load()?;
//! println!("Sampling every {} ms", config.acquisition.sample_period_ms);
//! # Ok::<(), mocap_recorder::error::RecorderError>(())
//! ```

use crate::error::{AppResult, RecorderError};
use crate::logging::OutputFormat;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level recorder configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Sampling and queueing settings
    pub acquisition: AcquisitionConfig,
    /// Persistent log settings
    pub storage: StorageConfig,
    /// Remote control channel settings
    pub control: ControlConfig,
    /// Status indicator timing
    pub indicator: IndicatorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (compact, pretty, json)
    pub log_format: String,
    /// Tag log lines with source file and line
    pub log_source_location: bool,
}

/// Acquisition pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Sampling period of the motion sensor in milliseconds
    pub sample_period_ms: u64,
    /// Capacity K of the acquisition queue
    pub queue_capacity: usize,
    /// Longest time the sampler may wait on a full queue
    pub push_timeout_ms: u64,
    /// Longest time a stop waits for the consumer to drain the queue
    pub drain_timeout_ms: u64,
    /// Samples accepted per session before the sampler stops producing
    pub max_samples: u16,
    /// Persisted samples between two progress reports (0 disables them)
    pub report_interval: u32,
}

/// Persistent log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory the storage medium is mounted at
    pub mount_point: PathBuf,
    /// Name of the sample data stream
    pub data_file: String,
    /// Name of the record metadata stream
    pub meta_file: String,
}

/// Control channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Address the control link listens on
    pub listen_addr: SocketAddr,
    /// Largest payload returned by one read request
    pub read_chunk: usize,
    /// Outgoing notification backlog before notifications are dropped
    pub notification_capacity: usize,
}

/// Connection indicator blink timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Short blink phase in milliseconds
    pub short_phase_ms: u64,
    /// Long blink phase in milliseconds
    pub long_phase_ms: u64,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "mocap-recorder".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
            log_source_location: false,
        }
    }
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sample_period_ms: 10,
            queue_capacity: 10,
            push_timeout_ms: 5,
            drain_timeout_ms: 1000,
            max_samples: u16::MAX,
            report_interval: 100,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mount_point: PathBuf::from("data"),
            data_file: "MOCAP.DAT".to_string(),
            meta_file: "META.DAT".to_string(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 7070)),
            read_chunk: 244,
            notification_capacity: 8,
        }
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            short_phase_ms: 50,
            long_phase_ms: 950,
        }
    }
}

impl AcquisitionConfig {
    /// Sampling period as a `Duration`
    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }

    /// Queue push timeout as a `Duration`
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    /// Drain timeout as a `Duration`
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl RecorderConfig {
    /// Load configuration from config/mocap.toml and environment variables
    ///
    /// Environment variables can override configuration with prefix MOCAP_
    /// Example: MOCAP_ACQUISITION__SAMPLE_PERIOD_MS=20
    pub fn load() -> AppResult<Self> {
        Self::load_from("config/mocap.toml")
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(RecorderConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MOCAP_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (defaults fill missing keys)
    pub fn from_toml_str(toml: &str) -> AppResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(RecorderConfig::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(RecorderError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }
        if let Err(e) = self.application.log_format.parse::<OutputFormat>() {
            return invalid(e);
        }

        let acquisition = &self.acquisition;
        if acquisition.sample_period_ms == 0 {
            return invalid("sample_period_ms must be greater than 0".to_string());
        }
        if acquisition.queue_capacity == 0 {
            return invalid("queue_capacity must be greater than 0".to_string());
        }
        if acquisition.push_timeout_ms >= acquisition.sample_period_ms {
            return invalid(format!(
                "push_timeout_ms ({}) must be shorter than sample_period_ms ({})",
                acquisition.push_timeout_ms, acquisition.sample_period_ms
            ));
        }
        if acquisition.max_samples == 0 {
            return invalid("max_samples must be greater than 0".to_string());
        }

        if self.storage.data_file.is_empty() || self.storage.meta_file.is_empty() {
            return invalid("storage stream names must not be empty".to_string());
        }
        if self.storage.data_file == self.storage.meta_file {
            return invalid(format!(
                "data_file and meta_file must differ (both '{}')",
                self.storage.data_file
            ));
        }

        if self.control.read_chunk == 0 || self.control.read_chunk > usize::from(u16::MAX) {
            return invalid(format!(
                "read_chunk {} out of range 1..={}",
                self.control.read_chunk,
                u16::MAX
            ));
        }
        if self.control.notification_capacity == 0 {
            return invalid("notification_capacity must be greater than 0".to_string());
        }

        if self.indicator.short_phase_ms == 0 || self.indicator.long_phase_ms == 0 {
            return invalid("indicator phases must be greater than 0".to_string());
        }

        Ok(())
    }
}
