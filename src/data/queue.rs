//! Bounded acquisition queue between the sampler and the storage consumer.
//!
//! # Design
//!
//! Two semaphores bracket a fixed-size lock-free ring:
//! 1. `free` counts empty slots (starts at capacity K)
//! 2. `filled` counts queued samples (starts at 0)
//! 3. `ArrayQueue` holds the samples themselves, allocated once
//!
//! A push takes a `free` permit (waiting at most the push timeout), stores the
//! sample and releases a `filled` permit. A pop does the reverse. Because every
//! stored sample is backed by exactly one `filled` permit, the ring never overflows
//! and never underflows, and FIFO order is the ring's order.
//!
//! A popped sample is handed out as a [`Delivery`]. The sample counts as *in
//! flight* until the delivery is dropped, which lets a stop sequence wait for
//! samples the consumer has popped but not yet persisted.
//!
//! # Example
//!
//! ```
//! use mocap_recorder::data::{AcquisitionQueue, Sample};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let queue = AcquisitionQueue::new(10);
//! queue.push(Sample::default(), Duration::from_millis(5)).await?;
//!
//! let delivery = queue.pop(None).await?;
//! assert_eq!(delivery.timestamp_ms, 0);
//! drop(delivery);
//!
//! queue.wait_drained(Duration::from_millis(10)).await?;
//! # Ok::<(), mocap_recorder::RecorderError>(())
//! # }).unwrap();
//! ```

use crossbeam_queue::ArrayQueue;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

use super::sample::Sample;
use crate::error::{AppResult, RecorderError};

/// Fixed-capacity FIFO of samples with bounded waits on both ends.
pub struct AcquisitionQueue {
    slots: ArrayQueue<Sample>,
    free: Semaphore,
    filled: Semaphore,
    /// Accepted samples not yet released by the consumer
    in_flight: AtomicUsize,
    drained: Notify,
    rejected: AtomicU64,
}

impl AcquisitionQueue {
    /// Create a queue holding at most `capacity` samples.
    ///
    /// # Panics
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0, "queue capacity must be greater than 0");

        Arc::new(Self {
            slots: ArrayQueue::new(capacity),
            free: Semaphore::new(capacity),
            filled: Semaphore::new(0),
            in_flight: AtomicUsize::new(0),
            drained: Notify::new(),
            rejected: AtomicU64::new(0),
        })
    }

    /// Push a sample, waiting at most `timeout` for a free slot.
    ///
    /// Returns `QueueFull` when the timeout elapses; the sample is not stored and
    /// the caller decides whether that is an overrun.
    pub async fn push(&self, sample: Sample, timeout: Duration) -> AppResult<()> {
        let permit = match tokio::time::timeout(timeout, self.free.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(RecorderError::QueueClosed),
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(RecorderError::QueueFull);
            }
        };
        permit.forget();
        self.store(sample);
        Ok(())
    }

    /// Push without waiting. Returns `QueueFull` if no slot is free right now.
    pub fn try_push(&self, sample: Sample) -> AppResult<()> {
        match self.free.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.store(sample);
                Ok(())
            }
            Err(tokio::sync::TryAcquireError::Closed) => Err(RecorderError::QueueClosed),
            Err(tokio::sync::TryAcquireError::NoPermits) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(RecorderError::QueueFull)
            }
        }
    }

    fn store(&self, sample: Sample) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if self.slots.push(sample).is_err() {
            // A free permit always guarantees a slot.
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            warn!("acquisition ring rejected a sample despite a free permit");
            return;
        }
        self.filled.add_permits(1);
    }

    /// Pop the oldest sample.
    ///
    /// With `Some(timeout)` waits at most that long and returns `QueueEmpty` on
    /// expiry; with `None` waits until a sample arrives or the queue is closed.
    pub async fn pop(self: &Arc<Self>, timeout: Option<Duration>) -> AppResult<Delivery> {
        let acquired = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.filled.acquire()).await {
                Ok(acquired) => acquired,
                Err(_) => return Err(RecorderError::QueueEmpty),
            },
            None => self.filled.acquire().await,
        };
        let permit = acquired.map_err(|_| RecorderError::QueueClosed)?;
        permit.forget();
        self.take()
    }

    /// Pop without waiting. Returns `QueueEmpty` if nothing is queued.
    pub fn try_pop(self: &Arc<Self>) -> AppResult<Delivery> {
        match self.filled.try_acquire() {
            Ok(permit) => {
                permit.forget();
                self.take()
            }
            Err(tokio::sync::TryAcquireError::Closed) => Err(RecorderError::QueueClosed),
            Err(tokio::sync::TryAcquireError::NoPermits) => Err(RecorderError::QueueEmpty),
        }
    }

    fn take(self: &Arc<Self>) -> AppResult<Delivery> {
        let sample = self.slots.pop().ok_or(RecorderError::QueueEmpty)?;
        self.free.add_permits(1);
        Ok(Delivery {
            queue: Arc::clone(self),
            sample,
        })
    }

    fn release(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Wait until every accepted sample has been popped and its delivery dropped.
    ///
    /// Returns `DrainTimeout` with the number still pending if `timeout` elapses.
    pub async fn wait_drained(&self, timeout: Duration) -> AppResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.drained.notified();
            let pending = self.in_flight();
            if pending == 0 {
                return Ok(());
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let pending = self.in_flight();
                if pending == 0 {
                    return Ok(());
                }
                return Err(RecorderError::DrainTimeout {
                    pending,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Close both ends. Blocked and future pushes and pops fail with `QueueClosed`.
    pub fn close(&self) {
        debug!(queued = self.len(), "closing acquisition queue");
        self.free.close();
        self.filled.close();
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.filled.is_closed()
    }

    /// Fixed capacity K.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Samples currently queued.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no sample is queued.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Samples accepted but not yet released by the consumer.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Pushes refused because the queue stayed full.
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// A popped sample, in flight until dropped.
pub struct Delivery {
    queue: Arc<AcquisitionQueue>,
    sample: Sample,
}

impl Delivery {
    /// The delivered sample.
    pub fn sample(&self) -> &Sample {
        &self.sample
    }
}

impl Deref for Delivery {
    type Target = Sample;

    fn deref(&self) -> &Self::Target {
        &self.sample
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.queue.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: u32) -> Sample {
        Sample {
            timestamp_ms: ts,
            ..Default::default()
        }
    }

    const SHORT: Duration = Duration::from_millis(20);

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = AcquisitionQueue::new(4);
        for ts in 0..4 {
            queue.push(sample(ts), SHORT).await.unwrap();
        }
        for ts in 0..4 {
            let delivery = queue.pop(Some(SHORT)).await.unwrap();
            assert_eq!(delivery.timestamp_ms, ts);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_push_past_capacity_reports_full() {
        let queue = AcquisitionQueue::new(10);
        for ts in 0..10 {
            queue.push(sample(ts), SHORT).await.unwrap();
        }

        let result = queue.push(sample(10), SHORT).await;
        assert!(matches!(result, Err(RecorderError::QueueFull)));
        assert!(matches!(queue.try_push(sample(11)), Err(RecorderError::QueueFull)));
        assert_eq!(queue.len(), 10);
        assert_eq!(queue.rejected(), 2);

        // Nothing was discarded: the oldest sample is still first.
        assert_eq!(queue.pop(None).await.unwrap().timestamp_ms, 0);
    }

    #[tokio::test]
    async fn test_pop_empty_times_out() {
        let queue = AcquisitionQueue::new(2);
        let result = queue.pop(Some(SHORT)).await;
        assert!(matches!(result, Err(RecorderError::QueueEmpty)));
        assert!(matches!(queue.try_pop(), Err(RecorderError::QueueEmpty)));
    }

    #[tokio::test]
    async fn test_blocked_pop_wakes_on_push() {
        let queue = AcquisitionQueue::new(2);
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop(None).await.map(|d| d.timestamp_ms) })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(sample(7), SHORT).await.unwrap();

        assert_eq!(consumer.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_blocked_push_succeeds_when_slot_frees() {
        let queue = AcquisitionQueue::new(1);
        queue.push(sample(0), SHORT).await.unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.push(sample(1), Duration::from_secs(1)).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(queue.pop(None).await.unwrap());

        producer.await.unwrap().unwrap();
        assert_eq!(queue.pop(None).await.unwrap().timestamp_ms, 1);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_pop() {
        let queue = AcquisitionQueue::new(2);
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.pop(None).await.map(|_| ()) })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        assert!(matches!(
            consumer.await.unwrap(),
            Err(RecorderError::QueueClosed)
        ));
        assert!(queue.is_closed());
        assert!(matches!(
            queue.push(sample(0), SHORT).await,
            Err(RecorderError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_in_flight_until_delivery_dropped() {
        let queue = AcquisitionQueue::new(4);
        queue.push(sample(0), SHORT).await.unwrap();
        queue.push(sample(1), SHORT).await.unwrap();
        assert_eq!(queue.in_flight(), 2);

        let first = queue.pop(None).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.in_flight(), 2);

        drop(first);
        assert_eq!(queue.in_flight(), 1);

        let result = queue.wait_drained(SHORT).await;
        assert!(matches!(
            result,
            Err(RecorderError::DrainTimeout { pending: 1, .. })
        ));

        drop(queue.pop(None).await.unwrap());
        queue.wait_drained(SHORT).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_drained_follows_consumer() {
        let queue = AcquisitionQueue::new(8);
        for ts in 0..8 {
            queue.push(sample(ts), SHORT).await.unwrap();
        }

        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move {
                while let Ok(delivery) = queue.pop(Some(SHORT)).await {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    drop(delivery);
                }
            })
        };

        queue.wait_drained(Duration::from_secs(2)).await.unwrap();
        assert_eq!(queue.in_flight(), 0);
        consumer.await.unwrap();
    }
}
