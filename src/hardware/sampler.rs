//! Periodic sampler: the time-critical producer of the pipeline.
//!
//! While running, a dedicated task wakes once per period, fetches a reading from
//! the motion sensor, stamps it relative to the session start and pushes it onto
//! the acquisition queue with a bounded timeout. It never waits longer than that
//! timeout, so a slow consumer shows up as counted overruns instead of a stalled
//! sampling loop.
//!
//! # Architecture
//!
//! ```text
//! interval (10 ms) → MotionSensor::fetch → Sample → AcquisitionQueue::push (≤ 5 ms)
//!                                                        ↓ QueueFull
//!                                                    overrun counter
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::capabilities::{MotionSensor, SampleSource};
use crate::config::AcquisitionConfig;
use crate::data::{AcquisitionQueue, Sample};
use crate::error::{AppResult, RecorderError};

/// Timing of the sampling loop.
#[derive(Debug, Clone, Copy)]
pub struct SamplerSettings {
    /// Time between two samples
    pub period: Duration,
    /// Longest wait on a full queue
    pub push_timeout: Duration,
    /// Samples accepted per session before production stops
    pub max_samples: u16,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self::from(&AcquisitionConfig::default())
    }
}

impl From<&AcquisitionConfig> for SamplerSettings {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            period: config.sample_period(),
            push_timeout: config.push_timeout(),
            max_samples: config.max_samples,
        }
    }
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU16,
    overruns: AtomicU64,
    sensor_errors: AtomicU64,
}

struct Worker {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// [`SampleSource`] driving a [`MotionSensor`] at a fixed period.
pub struct PeriodicSampler {
    sensor: Arc<dyn MotionSensor>,
    queue: Arc<AcquisitionQueue>,
    settings: SamplerSettings,
    counters: Arc<Counters>,
    running: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl PeriodicSampler {
    /// Sampler feeding `queue` from `sensor`.
    pub fn new(
        sensor: Arc<dyn MotionSensor>,
        queue: Arc<AcquisitionQueue>,
        settings: SamplerSettings,
    ) -> Self {
        Self {
            sensor,
            queue,
            settings,
            counters: Arc::new(Counters::default()),
            running: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Samples refused by a full queue this session.
    pub fn overruns(&self) -> u64 {
        self.counters.overruns.load(Ordering::Relaxed)
    }

    /// Failed sensor fetches this session.
    pub fn sensor_errors(&self) -> u64 {
        self.counters.sensor_errors.load(Ordering::Relaxed)
    }

    /// Loop timing.
    pub fn settings(&self) -> SamplerSettings {
        self.settings
    }
}

#[async_trait]
impl SampleSource for PeriodicSampler {
    async fn start(&self) -> AppResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(RecorderError::SampleSource(
                "sampler already running".to_string(),
            ));
        }

        self.counters.accepted.store(0, Ordering::Release);
        self.counters.overruns.store(0, Ordering::Relaxed);
        self.counters.sensor_errors.store(0, Ordering::Relaxed);

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_sampling_loop(
            Arc::clone(&self.sensor),
            Arc::clone(&self.queue),
            Arc::clone(&self.counters),
            self.settings,
            shutdown_rx,
        ));
        *self.worker.lock() = Some(Worker { shutdown, handle });

        info!(
            period_ms = self.settings.period.as_millis() as u64,
            max_samples = self.settings.max_samples,
            "Sampler started"
        );
        Ok(())
    }

    async fn stop(&self) -> AppResult<()> {
        let worker = self.worker.lock().take();
        let Some(worker) = worker else {
            self.running.store(false, Ordering::Release);
            return Ok(());
        };

        // The loop may already have ended on its own (sample ceiling, closed queue).
        let _ = worker.shutdown.send(());
        let joined = worker.handle.await;
        self.running.store(false, Ordering::Release);

        joined.map_err(|e| RecorderError::SampleSource(format!("sampling task failed: {e}")))?;
        info!(
            accepted = self.sample_count(),
            overruns = self.overruns(),
            sensor_errors = self.sensor_errors(),
            "Sampler stopped"
        );
        Ok(())
    }

    fn sample_count(&self) -> u16 {
        self.counters.accepted.load(Ordering::Acquire)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Milliseconds since session start, saturating at `u32::MAX` (about 49.7 days).
fn session_millis(elapsed: Duration) -> u32 {
    u32::try_from(elapsed.as_millis()).unwrap_or(u32::MAX)
}

async fn run_sampling_loop(
    sensor: Arc<dyn MotionSensor>,
    queue: Arc<AcquisitionQueue>,
    counters: Arc<Counters>,
    settings: SamplerSettings,
    mut shutdown: oneshot::Receiver<()>,
) {
    let session_start = Instant::now();
    let mut ticker = interval(settings.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        if counters.accepted.load(Ordering::Acquire) >= settings.max_samples {
            warn!(
                max_samples = settings.max_samples,
                "Session sample ceiling reached, sampling paused until stop"
            );
            break;
        }

        let reading = match sensor.fetch() {
            Ok(reading) => reading,
            Err(e) => {
                counters.sensor_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Sensor sample fetch failed");
                continue;
            }
        };

        let sample = Sample {
            timestamp_ms: session_millis(session_start.elapsed()),
            accel: reading.accel,
            gyro: reading.gyro,
        };

        match queue.push(sample, settings.push_timeout).await {
            Ok(()) => {
                counters.accepted.fetch_add(1, Ordering::AcqRel);
            }
            Err(RecorderError::QueueFull) => {
                let overruns = counters.overruns.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    timestamp_ms = sample.timestamp_ms,
                    overruns,
                    "Acquisition queue full - sample dropped (overrun)"
                );
            }
            Err(e) => {
                debug!(error = %e, "Acquisition queue unavailable, sampling loop exiting");
                break;
            }
        }
    }
}
