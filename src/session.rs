//! Session aggregate.
//!
//! Owns one complete pipeline: acquisition queue, persistent log, periodic
//! sampler, coordinator, control handler and the background tasks (storage
//! consumer, connection blinker). Built once at startup and shared by handle;
//! independent instances can live side by side.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::RecorderConfig;
use crate::consumer::{run_consumer, ConsumerSettings, ConsumerStats};
use crate::control::{ControlHandler, Notification};
use crate::coordinator::RecordingCoordinator;
use crate::data::{AcquisitionQueue, PersistentLog, StorageMedium, StreamNames};
use crate::error::AppResult;
use crate::hardware::{
    run_connection_blinker, MotionSensor, PeriodicSampler, SamplerSettings, StatusIndicator,
    TracingIndicator,
};

/// The two status outputs of the device.
#[derive(Clone)]
pub struct Indicators {
    /// Toggled per persisted sample, steady on stop
    pub status: Arc<dyn StatusIndicator>,
    /// Blinks the connection pattern
    pub connection: Arc<dyn StatusIndicator>,
}

impl Default for Indicators {
    fn default() -> Self {
        Self {
            status: Arc::new(TracingIndicator::new("status")),
            connection: Arc::new(TracingIndicator::new("connection")),
        }
    }
}

/// A running recorder.
pub struct Session {
    queue: Arc<AcquisitionQueue>,
    log: Arc<PersistentLog>,
    sampler: Arc<PeriodicSampler>,
    coordinator: Arc<RecordingCoordinator>,
    handler: Arc<ControlHandler>,
    notifications: Option<mpsc::Receiver<Notification>>,
    consumer: JoinHandle<()>,
    blinker: JoinHandle<()>,
}

impl Session {
    /// Mount `medium` and start the background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: &RecorderConfig,
        medium: Arc<dyn StorageMedium>,
        sensor: Arc<dyn MotionSensor>,
        indicators: Indicators,
    ) -> AppResult<Self> {
        let acquisition = &config.acquisition;
        let names = StreamNames {
            data: config.storage.data_file.clone(),
            meta: config.storage.meta_file.clone(),
        };

        let queue = AcquisitionQueue::new(acquisition.queue_capacity);
        let log = Arc::new(PersistentLog::mount(medium, names)?);
        let sampler = Arc::new(PeriodicSampler::new(
            sensor,
            Arc::clone(&queue),
            SamplerSettings::from(acquisition),
        ));
        let stats = Arc::new(ConsumerStats::default());

        let consumer = tokio::spawn(run_consumer(
            Arc::clone(&queue),
            Arc::clone(&log),
            Arc::clone(&indicators.status),
            Arc::clone(&stats),
            ConsumerSettings {
                report_interval: acquisition.report_interval,
            },
        ));

        let coordinator = Arc::new(RecordingCoordinator::new(
            Arc::clone(&log),
            sampler.clone(),
            Arc::clone(&queue),
            indicators.status,
            stats,
            acquisition.drain_timeout(),
        ));

        let (handler, notifications) = ControlHandler::new(
            Arc::clone(&coordinator),
            config.control.read_chunk,
            config.control.notification_capacity,
        );
        let handler = Arc::new(handler);

        let blinker = tokio::spawn(run_connection_blinker(
            indicators.connection,
            config.indicator.clone(),
            handler.connection(),
        ));

        info!(
            queue_capacity = queue.capacity(),
            period_ms = acquisition.sample_period_ms,
            "Session ready"
        );

        Ok(Self {
            queue,
            log,
            sampler,
            coordinator,
            handler,
            notifications: Some(notifications),
            consumer,
            blinker,
        })
    }

    /// Session state machine.
    pub fn coordinator(&self) -> &Arc<RecordingCoordinator> {
        &self.coordinator
    }

    /// Entry point for a control transport.
    pub fn control_handler(&self) -> &Arc<ControlHandler> {
        &self.handler
    }

    /// Receiving end of the notification channel. Available once.
    pub fn take_notifications(&mut self) -> Option<mpsc::Receiver<Notification>> {
        self.notifications.take()
    }

    /// The periodic sampler, for overrun statistics.
    pub fn sampler(&self) -> &Arc<PeriodicSampler> {
        &self.sampler
    }

    /// The persistent log.
    pub fn log(&self) -> &Arc<PersistentLog> {
        &self.log
    }

    /// The acquisition queue.
    pub fn queue(&self) -> &Arc<AcquisitionQueue> {
        &self.queue
    }

    /// Stop any active session, close the queue and wait for the consumer.
    pub async fn shutdown(self) -> AppResult<()> {
        let stopped = self.coordinator.stop().await;
        if let Err(e) = &stopped {
            warn!(error = %e, "Stop during shutdown incomplete");
        }

        self.queue.close();
        if let Err(e) = self.consumer.await {
            warn!(error = %e, "Consumer task ended abnormally");
        }
        self.blinker.abort();
        self.log.close()?;

        info!("Session shut down");
        stopped.map(|_| ())
    }
}
