//! Asynchronous delivery of feed events into a [`FeedStore`].
//!
//! The inventory services emit through a [`FeedPublisher`], which pushes onto
//! a bounded queue and never blocks or fails. When the queue is full the event
//! is shed with a warning. A [`FeedWorker`] drains the queue and persists each
//! event with bounded retries. An event that still fails after the last
//! attempt is logged and dropped; the business operation that produced it has
//! already committed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use stockflow_events::{FeedEvent, FeedSink};

use crate::store::FeedStore;

/// Events that may wait for the worker before publishers start shedding.
pub const DEFAULT_FEED_QUEUE_CAPACITY: usize = 1024;

/// Retry schedule for feed persistence: exponential, capped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRetry {
    /// Total attempts per event, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for FeedRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl FeedRetry {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (1-indexed): `base * 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Counters reported when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedWorkerStats {
    pub delivered: u64,
    pub dropped: u64,
    pub retries: u64,
}

/// [`FeedSink`] that hands events to a [`FeedWorker`].
#[derive(Debug, Clone)]
pub struct FeedPublisher {
    tx: mpsc::Sender<FeedEvent>,
    shed: Arc<AtomicU64>,
}

impl FeedPublisher {
    /// Events discarded by this publisher and its clones.
    pub fn shed_count(&self) -> u64 {
        self.shed.load(Ordering::Relaxed)
    }
}

impl FeedSink for FeedPublisher {
    fn emit(&self, event: FeedEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.shed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_type = %event.event_type(),
                    account_id = %event.account_id,
                    capacity = self.tx.max_capacity(),
                    "feed queue full; event discarded"
                );
            }
            Err(TrySendError::Closed(event)) => {
                self.shed.fetch_add(1, Ordering::Relaxed);
                warn!(event_type = %event.event_type(), "feed worker gone; event discarded");
            }
        }
    }
}

/// Background consumer persisting feed events.
pub struct FeedWorker<S> {
    store: Arc<S>,
    rx: mpsc::Receiver<FeedEvent>,
    retry: FeedRetry,
}

/// Wire a publisher to a worker writing into `store`, queueing at most
/// `capacity` events (at least one).
///
/// The worker finishes once every publisher clone has been dropped and the
/// queue is drained.
pub fn feed_channel<S: FeedStore>(
    store: Arc<S>,
    retry: FeedRetry,
    capacity: usize,
) -> (FeedPublisher, FeedWorker<S>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let publisher = FeedPublisher {
        tx,
        shed: Arc::new(AtomicU64::new(0)),
    };
    (publisher, FeedWorker { store, rx, retry })
}

impl<S: FeedStore + 'static> FeedWorker<S> {
    pub fn spawn(self) -> JoinHandle<FeedWorkerStats> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) -> FeedWorkerStats {
        let mut stats = FeedWorkerStats::default();
        info!("feed worker started");

        while let Some(event) = self.rx.recv().await {
            self.deliver(event, &mut stats).await;
        }

        info!(
            delivered = stats.delivered,
            dropped = stats.dropped,
            retries = stats.retries,
            "feed worker stopped"
        );
        stats
    }

    async fn deliver(&self, event: FeedEvent, stats: &mut FeedWorkerStats) {
        let attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.store.append_feed(event.clone()).await {
                Ok(entry) => {
                    debug!(feed_id = %entry.id, event_type = %event.event_type(), attempt, "feed event stored");
                    stats.delivered += 1;
                    return;
                }
                Err(err) if attempt < attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!(
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "feed append failed; retrying"
                    );
                    stats.retries += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    error!(
                        error = %err,
                        attempts,
                        event_type = %event.event_type(),
                        account_id = %event.account_id,
                        "feed event dropped after retries"
                    );
                    stats.dropped += 1;
                }
            }
        }
    }
}
