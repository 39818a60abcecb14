//! Hardware seams of the recorder.
//!
//! The sensor driver and the status outputs are external collaborators reached
//! through the traits in [`capabilities`]. This module also carries the periodic
//! sampler that turns a [`MotionSensor`] into a [`SampleSource`], plus simulated
//! devices for running without the wearable.

pub mod capabilities;
pub mod indicator;
pub mod mock;
pub mod sampler;

pub use capabilities::{MotionReading, MotionSensor, SampleSource, StatusIndicator};
pub use indicator::{blink_phase, run_connection_blinker, TracingIndicator};
pub use sampler::{PeriodicSampler, SamplerSettings};
