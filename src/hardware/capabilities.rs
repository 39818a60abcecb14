//! Hardware Capabilities
//!
//! Small traits for the collaborators the acquisition pipeline talks to. The
//! physical drivers stay outside this crate; these traits are the seams they plug
//! into:
//!
//! - [`MotionSensor`]: the IMU driver, fetched once per sampling period
//! - [`SampleSource`]: something that produces samples onto the acquisition queue
//!   while started
//! - [`StatusIndicator`]: a fire-and-forget status output (an LED on the device)
//!
//! # Design Philosophy
//!
//! - `MotionSensor` and `StatusIndicator` are synchronous: they are called from
//!   the time-critical sampling context and from the consumer's hot path, and must
//!   not wait on anything.
//! - `SampleSource` is async (uses #[async_trait]) because starting and stopping
//!   it involves task lifecycle.
//! - Everything is thread-safe (requires Send + Sync) and shared behind `Arc`.
//!
//! # Example
//!
//! ```rust,ignore
//! struct Mpu6050 { bus: I2cBus }
//!
//! impl MotionSensor for Mpu6050 {
//!     fn fetch(&self) -> AppResult<MotionReading> {
//!         let raw = self.bus.read_block(ACCEL_XOUT_H, 14)?;
//!         Ok(MotionReading::from_raw(&raw))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::data::SensorValue;
use crate::error::AppResult;

/// One accelerometer + gyroscope reading, before timestamping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionReading {
    /// Linear acceleration X/Y/Z in m/s²
    pub accel: [SensorValue; 3],
    /// Angular rate X/Y/Z in rad/s
    pub gyro: [SensorValue; 3],
}

/// Capability: Motion Sensing
///
/// An inertial sensor that can be sampled on demand.
///
/// # Contract
/// - `fetch` triggers a conversion and returns both channels from the same instant
/// - Must return within a small fraction of the sampling period
pub trait MotionSensor: Send + Sync {
    /// Fetch one reading from the sensor.
    fn fetch(&self) -> AppResult<MotionReading>;
}

/// Capability: Sample Production
///
/// Produces one timestamped sample per period onto the acquisition queue while
/// running.
///
/// # Contract
/// - `start` resets the session counter and timestamp base to zero
/// - After `stop` returns, no further sample is enqueued
/// - `sample_count` is the number of samples accepted by the queue this session
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Begin producing samples.
    async fn start(&self) -> AppResult<()>;

    /// Stop producing samples. No-op when not running.
    async fn stop(&self) -> AppResult<()>;

    /// Samples accepted by the queue since the last `start`.
    fn sample_count(&self) -> u16;

    /// Whether the source is between `start` and `stop`.
    fn is_running(&self) -> bool;
}

/// Capability: Status Output
///
/// A binary indicator. Calls never fail and never block; a broken indicator must
/// not affect acquisition.
pub trait StatusIndicator: Send + Sync {
    /// Invert the current state.
    fn toggle(&self);

    /// Force a steady state.
    fn set(&self, on: bool);
}
