//! Storage consumer: the lower-priority half of the acquisition pipeline.
//!
//! A single long-running task pops samples from the acquisition queue, waiting as
//! long as it takes, and appends each one to the persistent log in the order it was
//! produced. It runs for the lifetime of the session aggregate, independent of the
//! recording state, and exits once the queue is closed.

use bytes::BytesMut;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::data::{AcquisitionQueue, PersistentLog, SAMPLE_SIZE};
use crate::error::RecorderError;
use crate::hardware::StatusIndicator;

/// Counters shared between the consumer task and the coordinator.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    persisted: AtomicU32,
    failed: AtomicU64,
}

impl ConsumerStats {
    /// Samples appended since the last reset.
    pub fn persisted(&self) -> u32 {
        self.persisted.load(Ordering::Acquire)
    }

    /// Samples lost to append failures since the last reset.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Zero both counters. Called when a session starts.
    pub fn reset(&self) {
        self.persisted.store(0, Ordering::Release);
        self.failed.store(0, Ordering::Relaxed);
    }
}

/// Consumer settings.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerSettings {
    /// Persisted samples between two progress reports (0 disables them)
    pub report_interval: u32,
}

/// Pop, append and signal until the queue is closed.
pub async fn run_consumer(
    queue: Arc<AcquisitionQueue>,
    log: Arc<PersistentLog>,
    indicator: Arc<dyn StatusIndicator>,
    stats: Arc<ConsumerStats>,
    settings: ConsumerSettings,
) {
    let mut buf = BytesMut::with_capacity(SAMPLE_SIZE);
    info!("Consumer started");

    loop {
        let delivery = match queue.pop(None).await {
            Ok(delivery) => delivery,
            Err(RecorderError::QueueClosed) => break,
            Err(e) => {
                debug!(error = %e, "Unexpected pop result");
                continue;
            }
        };

        buf.clear();
        delivery.encode_into(&mut buf);

        match log.append(&buf) {
            Ok(_) => {
                let persisted = stats.persisted.fetch_add(1, Ordering::AcqRel) + 1;
                indicator.toggle();
                if settings.report_interval > 0 && persisted % settings.report_interval == 0 {
                    let sample = delivery.sample();
                    info!(
                        persisted,
                        timestamp_ms = sample.timestamp_ms,
                        accel_x = sample.accel[0].to_f64(),
                        accel_y = sample.accel[1].to_f64(),
                        accel_z = sample.accel[2].to_f64(),
                        gyro_x = sample.gyro[0].to_f64(),
                        gyro_y = sample.gyro[1].to_f64(),
                        gyro_z = sample.gyro[2].to_f64(),
                        "Recording progress"
                    );
                }
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    timestamp_ms = delivery.timestamp_ms,
                    error = %e,
                    "Fail to write sample"
                );
            }
        }
        // Dropping the delivery marks the sample as drained.
    }

    info!(
        persisted = stats.persisted(),
        failed = stats.failed(),
        "Consumer stopped"
    );
}
