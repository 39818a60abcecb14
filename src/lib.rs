//! # Motion-Capture Recorder Core Library
//!
//! This crate implements the acquisition pipeline of a wearable motion-capture
//! device: an inertial sensor is sampled at a fixed period, samples cross a bounded
//! queue from the time-critical sampling task to a storage consumer, and are
//! appended to a two-stream persistent log (sample data + session metadata). A
//! remote controller starts and stops sessions, pages through recorded data and
//! queries the session summary.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based configuration (`config/mocap.toml` + `MOCAP_` environment).
//! - **`consumer`**: The storage consumer task popping samples and appending them to the log.
//! - **`control`**: Command decoding, notifications and the TCP stand-in for the control link.
//! - **`coordinator`**: The `Idle`/`Recording` state machine sequencing start and stop.
//! - **`data`**: Sample and meta records, the acquisition queue, storage media and the log.
//! - **`error`**: The `RecorderError` enum shared by every layer.
//! - **`hardware`**: Capability traits for the sensor and status outputs, the periodic
//!   sampler and simulated devices.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`session`**: The aggregate owning one complete pipeline.
//!
//! ## Data Flow
//!
//! ```text
//! controller ──▶ ControlHandler ──▶ RecordingCoordinator ──▶ {PeriodicSampler, PersistentLog}
//!
//! PeriodicSampler ──push──▶ AcquisitionQueue ──pop──▶ consumer ──append──▶ PersistentLog
//! ```

pub mod config;
pub mod consumer;
pub mod control;
pub mod coordinator;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod session;

pub use config::RecorderConfig;
pub use coordinator::{RecordingCoordinator, RecordingState};
pub use error::{AppResult, RecorderError};
pub use session::{Indicators, Session};
