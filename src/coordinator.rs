//! Recording coordinator: owner of the session state machine.
//!
//! ```text
//!          start() ok
//!   Idle ─────────────▶ Recording
//!    ▲                     │
//!    └─────────────────────┘
//!          stop() (always)
//! ```
//!
//! Transitions are serialized by an async mutex on the state, held for the whole
//! transition. The log has its own lock, taken and released per operation, so the
//! consumer keeps appending while a stop waits for the queue to drain.
//!
//! `start` is all-or-nothing: the first failure aborts it and the state stays
//! `Idle`. `stop` is best-effort: every step runs, failures are collected, and the
//! state always ends `Idle`.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::consumer::ConsumerStats;
use crate::data::{AcquisitionQueue, PersistentLog, RecordMeta, META_SIZE};
use crate::error::{AppResult, RecorderError, StopErrors};
use crate::hardware::{SampleSource, StatusIndicator};

/// Whether a recording session is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    /// No session; the log may be open or closed
    #[default]
    Idle,
    /// Sampling and persisting
    Recording,
}

/// Sequences the sample source, the queue and the persistent log.
pub struct RecordingCoordinator {
    state: Mutex<RecordingState>,
    log: Arc<PersistentLog>,
    source: Arc<dyn SampleSource>,
    queue: Arc<AcquisitionQueue>,
    indicator: Arc<dyn StatusIndicator>,
    stats: Arc<ConsumerStats>,
    drain_timeout: Duration,
}

impl RecordingCoordinator {
    /// Coordinator over already-constructed pipeline parts.
    pub fn new(
        log: Arc<PersistentLog>,
        source: Arc<dyn SampleSource>,
        queue: Arc<AcquisitionQueue>,
        indicator: Arc<dyn StatusIndicator>,
        stats: Arc<ConsumerStats>,
        drain_timeout: Duration,
    ) -> Self {
        Self {
            state: Mutex::new(RecordingState::Idle),
            log,
            source,
            queue,
            indicator,
            stats,
            drain_timeout,
        }
    }

    /// Begin a session: open and clear the log, then start the sample source.
    ///
    /// Fails with `AlreadyRecording` if a session is active. Samples a previous
    /// stop left in the queue are drained first; if they do not drain within the
    /// drain timeout the start fails with `DrainTimeout` and nothing is touched.
    /// If opening succeeded but a later step failed, the log is closed again.
    pub async fn start(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if *state == RecordingState::Recording {
            return Err(RecorderError::AlreadyRecording);
        }

        if let Err(e) = self.queue.wait_drained(self.drain_timeout).await {
            warn!(error = %e, "Previous session still draining, start refused");
            return Err(e);
        }

        self.log.open()?;
        if let Err(e) = self.begin_session().await {
            warn!(error = %e, "Recording start aborted");
            if let Err(close_err) = self.log.close() {
                warn!(error = %close_err, "Close after aborted start failed");
            }
            return Err(e);
        }

        *state = RecordingState::Recording;
        info!("Recording started");
        Ok(())
    }

    async fn begin_session(&self) -> AppResult<()> {
        self.log.clear()?;
        self.stats.reset();
        self.source.start().await
    }

    /// End the session and finalize its metadata.
    ///
    /// Stops the source, waits for the consumer to persist every accepted sample,
    /// writes the meta record, sets the status indicator steady and closes the log.
    /// Returns the written meta, or `None` when no session was active.
    pub async fn stop(&self) -> AppResult<Option<RecordMeta>> {
        let mut state = self.state.lock().await;
        if *state == RecordingState::Idle {
            debug!("Stop while idle ignored");
            return Ok(None);
        }

        let mut errors = Vec::new();

        if let Err(e) = self.source.stop().await {
            errors.push(e);
        }
        if let Err(e) = self.queue.wait_drained(self.drain_timeout).await {
            warn!(error = %e, "Finalizing before the queue drained");
            errors.push(e);
        }

        let meta = RecordMeta::for_samples(self.source.sample_count());
        let persisted = self.stats.persisted();
        if persisted != u32::from(meta.sample_count) {
            warn!(
                produced = meta.sample_count,
                persisted,
                failed = self.stats.failed(),
                "Persisted sample count differs from produced count"
            );
        }

        match self.log.meta_write(&meta.encode()) {
            Ok(_) => info!(
                sample_count = meta.sample_count,
                total_size = meta.total_size,
                "Meta written"
            ),
            Err(e) => errors.push(e),
        }

        self.indicator.set(true);

        if let Err(e) = self.log.close() {
            errors.push(e);
        }

        *state = RecordingState::Idle;
        if errors.is_empty() {
            info!("Recording stopped");
        } else {
            warn!(errors = %StopErrors(&errors), "Recording stopped with errors");
        }
        RecorderError::collect(errors).map(|()| Some(meta))
    }

    /// Open the log outside of a session.
    pub async fn open_storage(&self) -> AppResult<()> {
        let state = self.state.lock().await;
        if *state == RecordingState::Recording {
            debug!("Reopening storage during a session");
        }
        self.log.open()
    }

    /// Close the log outside of a session.
    pub async fn close_storage(&self) -> AppResult<()> {
        let state = self.state.lock().await;
        if *state == RecordingState::Recording {
            warn!("Closing storage during a session, samples will be lost");
        }
        self.log.close()
    }

    /// Current session summary.
    ///
    /// While recording, a live snapshot of what has been persisted so far. While
    /// idle, the meta record stored by the last stop, or `NoRecord` if there is
    /// none.
    pub async fn get_meta(&self) -> AppResult<RecordMeta> {
        let state = self.state.lock().await;
        match *state {
            RecordingState::Recording => {
                let persisted = u16::try_from(self.stats.persisted()).unwrap_or(u16::MAX);
                Ok(RecordMeta::for_samples(persisted))
            }
            RecordingState::Idle => {
                let mut buf = [0u8; META_SIZE];
                let n = self.log.meta_read_at(0, &mut buf)?;
                if n < META_SIZE {
                    return Err(RecorderError::NoRecord);
                }
                RecordMeta::decode(&buf)
            }
        }
    }

    /// Read up to `len` bytes from the data stream's read cursor.
    pub fn read(&self, len: usize) -> AppResult<Bytes> {
        let mut buf = vec![0u8; len];
        let n = self.log.read(&mut buf)?;
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    /// Current state.
    pub async fn state(&self) -> RecordingState {
        *self.state.lock().await
    }

    /// Whether a session is active.
    pub async fn is_recording(&self) -> bool {
        self.state().await == RecordingState::Recording
    }

    /// Consumer counters for the current session.
    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MemoryMedium, Sample, StreamNames, SAMPLE_SIZE};
    use crate::hardware::mock::RecordingIndicator;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};

    /// Source that pushes a fixed batch on start.
    struct BatchSource {
        queue: Arc<AcquisitionQueue>,
        batch: u16,
        count: AtomicU16,
        running: AtomicBool,
        fail_start: AtomicBool,
    }

    #[async_trait]
    impl SampleSource for BatchSource {
        async fn start(&self) -> AppResult<()> {
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(RecorderError::SampleSource("no sensor".into()));
            }
            self.count.store(0, Ordering::SeqCst);
            self.running.store(true, Ordering::SeqCst);
            for t in 0..self.batch {
                self.queue
                    .push(
                        Sample {
                            timestamp_ms: u32::from(t) * 10,
                            ..Sample::default()
                        },
                        Duration::from_secs(1),
                    )
                    .await?;
                self.count.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        async fn stop(&self) -> AppResult<()> {
            self.running.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn sample_count(&self) -> u16 {
            self.count.load(Ordering::SeqCst)
        }

        fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }
    }

    struct Fixture {
        medium: MemoryMedium,
        log: Arc<PersistentLog>,
        source: Arc<BatchSource>,
        led: Arc<RecordingIndicator>,
        coordinator: RecordingCoordinator,
        queue: Arc<AcquisitionQueue>,
    }

    fn fixture(batch: u16) -> Fixture {
        let medium = MemoryMedium::new();
        let log = Arc::new(
            PersistentLog::mount(Arc::new(medium.clone()), StreamNames::default()).unwrap(),
        );
        let queue = AcquisitionQueue::new(64);
        let source = Arc::new(BatchSource {
            queue: Arc::clone(&queue),
            batch,
            count: AtomicU16::new(0),
            running: AtomicBool::new(false),
            fail_start: AtomicBool::new(false),
        });
        let led = Arc::new(RecordingIndicator::new());
        let stats = Arc::new(ConsumerStats::default());
        tokio::spawn(crate::consumer::run_consumer(
            Arc::clone(&queue),
            Arc::clone(&log),
            led.clone(),
            Arc::clone(&stats),
            crate::consumer::ConsumerSettings { report_interval: 0 },
        ));
        let coordinator = RecordingCoordinator::new(
            Arc::clone(&log),
            source.clone(),
            Arc::clone(&queue),
            led.clone(),
            stats,
            Duration::from_secs(1),
        );
        Fixture {
            medium,
            log,
            source,
            led,
            coordinator,
            queue,
        }
    }

    #[tokio::test]
    async fn test_stop_from_idle_is_noop() {
        let f = fixture(3);
        assert_eq!(f.coordinator.stop().await.unwrap(), None);
        assert!(!f.log.is_open());
        assert_eq!(f.medium.contents("META.DAT"), None);
        assert_eq!(f.led.sets(), 0);
        f.queue.close();
    }

    #[tokio::test]
    async fn test_start_stop_writes_meta() {
        let f = fixture(12);
        f.coordinator.start().await.unwrap();
        assert!(f.coordinator.is_recording().await);
        assert!(matches!(
            f.coordinator.start().await,
            Err(RecorderError::AlreadyRecording)
        ));

        let meta = f.coordinator.stop().await.unwrap().unwrap();
        assert_eq!(meta.sample_count, 12);
        assert_eq!(meta.total_size, 12 * SAMPLE_SIZE as u32);
        assert_eq!(f.coordinator.state().await, RecordingState::Idle);
        assert!(!f.log.is_open());
        assert!(f.led.is_on());

        let data = f.medium.contents("MOCAP.DAT").unwrap();
        assert_eq!(data.len(), 12 * SAMPLE_SIZE);
        let stored = RecordMeta::decode(&f.medium.contents("META.DAT").unwrap()).unwrap();
        assert_eq!(stored, meta);
        f.queue.close();
    }

    #[tokio::test]
    async fn test_get_meta_requires_a_record() {
        let f = fixture(4);
        assert!(matches!(
            f.coordinator.get_meta().await,
            Err(RecorderError::NotOpen)
        ));

        f.coordinator.open_storage().await.unwrap();
        f.log.clear().unwrap();
        assert!(matches!(
            f.coordinator.get_meta().await,
            Err(RecorderError::NoRecord)
        ));

        f.coordinator.start().await.unwrap();
        f.coordinator.stop().await.unwrap();
        f.coordinator.open_storage().await.unwrap();
        let meta = f.coordinator.get_meta().await.unwrap();
        assert_eq!(meta, RecordMeta::for_samples(4));
        f.queue.close();
    }

    #[tokio::test]
    async fn test_failed_start_stays_idle() {
        let f = fixture(4);
        f.source.fail_start.store(true, Ordering::SeqCst);

        assert!(matches!(
            f.coordinator.start().await,
            Err(RecorderError::SampleSource(_))
        ));
        assert_eq!(f.coordinator.state().await, RecordingState::Idle);
        assert!(!f.log.is_open());

        f.source.fail_start.store(false, Ordering::SeqCst);
        f.medium.fail_open(true);
        assert!(matches!(
            f.coordinator.start().await,
            Err(RecorderError::Io(_))
        ));
        assert_eq!(f.coordinator.state().await, RecordingState::Idle);
        f.queue.close();
    }

    #[tokio::test]
    async fn test_stop_reaches_idle_despite_close_failure() {
        let f = fixture(2);
        f.coordinator.start().await.unwrap();
        f.medium.fail_sync(true);

        assert!(matches!(
            f.coordinator.stop().await,
            Err(RecorderError::Io(_))
        ));
        assert_eq!(f.coordinator.state().await, RecordingState::Idle);
        assert!(!f.log.is_open());
        f.queue.close();
    }

    #[tokio::test]
    async fn test_read_pages_through_data() {
        let f = fixture(3);
        f.coordinator.start().await.unwrap();
        f.queue.wait_drained(Duration::from_secs(1)).await.unwrap();

        let first = f.coordinator.read(SAMPLE_SIZE + 10).unwrap();
        assert_eq!(first.len(), SAMPLE_SIZE + 10);
        let rest = f.coordinator.read(4 * SAMPLE_SIZE).unwrap();
        assert_eq!(rest.len(), 2 * SAMPLE_SIZE - 10);
        assert!(f.coordinator.read(16).unwrap().is_empty());
        f.coordinator.stop().await.unwrap();
        f.queue.close();
    }
}
