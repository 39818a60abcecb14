//! Mock Hardware Implementations
//!
//! Simulated collaborators for running the recorder without a device.
//!
//! # Available Mocks
//!
//! - `SimulatedImu` - Motion sensor producing a slow swing plus noise
//! - `FaultySensor` - Motion sensor that fails every fetch
//! - `RecordingIndicator` - Status indicator that remembers every call

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use super::capabilities::{MotionReading, MotionSensor, StatusIndicator};
use crate::data::SensorValue;
use crate::error::{AppResult, RecorderError};

/// Standard gravity in m/s².
const GRAVITY: f64 = 9.806_65;

// =============================================================================
// SimulatedImu - Swinging limb
// =============================================================================

/// Simulated 6-axis IMU strapped to a swinging limb.
///
/// Gravity sits on Z, X/Y acceleration and the Z angular rate follow a 1 Hz swing,
/// and every channel carries a little uniform noise. Seeded, so two instances with
/// the same seed produce the same noise sequence.
pub struct SimulatedImu {
    rng: Mutex<StdRng>,
    epoch: Instant,
    swing_hz: f64,
    noise: f64,
}

impl SimulatedImu {
    /// Create a simulated IMU with a 1 Hz swing.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            epoch: Instant::now(),
            swing_hz: 1.0,
            noise: 0.02,
        }
    }

    /// Change the swing frequency.
    pub fn with_swing_hz(mut self, swing_hz: f64) -> Self {
        self.swing_hz = swing_hz;
        self
    }
}

impl MotionSensor for SimulatedImu {
    fn fetch(&self) -> AppResult<MotionReading> {
        let phase = std::f64::consts::TAU * self.swing_hz * self.epoch.elapsed().as_secs_f64();
        let mut rng = self.rng.lock();
        let mut jitter = || rng.gen_range(-self.noise..=self.noise);

        let accel = [
            2.0 * phase.sin() + jitter(),
            0.5 * phase.cos() + jitter(),
            GRAVITY + jitter(),
        ];
        let gyro = [jitter(), jitter(), 1.5 * phase.cos() + jitter()];

        Ok(MotionReading {
            accel: accel.map(SensorValue::from_f64),
            gyro: gyro.map(SensorValue::from_f64),
        })
    }
}

// =============================================================================
// FaultySensor - Always fails
// =============================================================================

/// Motion sensor whose bus is dead.
#[derive(Debug, Default)]
pub struct FaultySensor;

impl MotionSensor for FaultySensor {
    fn fetch(&self) -> AppResult<MotionReading> {
        Err(RecorderError::SampleSource(
            "sensor did not acknowledge".to_string(),
        ))
    }
}

// =============================================================================
// RecordingIndicator - Remembers calls
// =============================================================================

/// Status indicator that tracks its state and counts toggles.
#[derive(Debug, Default)]
pub struct RecordingIndicator {
    on: AtomicBool,
    toggles: AtomicU64,
    sets: AtomicU64,
}

impl RecordingIndicator {
    /// New indicator, initially off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    /// Toggles since creation.
    pub fn toggles(&self) -> u64 {
        self.toggles.load(Ordering::SeqCst)
    }

    /// `set` calls since creation.
    pub fn sets(&self) -> u64 {
        self.sets.load(Ordering::SeqCst)
    }
}

impl StatusIndicator for RecordingIndicator {
    fn toggle(&self) {
        self.on.fetch_xor(true, Ordering::SeqCst);
        self.toggles.fetch_add(1, Ordering::SeqCst);
    }

    fn set(&self, on: bool) {
        self.on.store(on, Ordering::SeqCst);
        self.sets.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_imu_sees_gravity() {
        let imu = SimulatedImu::new(42);
        let reading = imu.fetch().unwrap();
        let z = reading.accel[2].to_f64();
        assert!((z - GRAVITY).abs() < 0.1, "z = {z}");
    }

    #[test]
    fn test_simulated_imu_is_seeded() {
        let a = SimulatedImu::new(7).with_swing_hz(0.0);
        let b = SimulatedImu::new(7).with_swing_hz(0.0);
        for _ in 0..5 {
            assert_eq!(a.fetch().unwrap(), b.fetch().unwrap());
        }
    }

    #[test]
    fn test_faulty_sensor_fails() {
        assert!(matches!(
            FaultySensor.fetch(),
            Err(RecorderError::SampleSource(_))
        ));
    }

    #[test]
    fn test_recording_indicator() {
        let led = RecordingIndicator::new();
        led.toggle();
        assert!(led.is_on());
        led.toggle();
        assert!(!led.is_on());
        led.set(true);
        assert!(led.is_on());
        assert_eq!(led.toggles(), 2);
        assert_eq!(led.sets(), 1);
    }
}
