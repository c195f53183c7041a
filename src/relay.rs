//! Store-and-forward relay: an in-memory FIFO queue and its drain loop.
//!
//! The receiver pushes records into a `RelayQueue`; one `RelayWorker` pops a
//! single record per tick and hands it to a `RecordSink`. A record is removed
//! before delivery is attempted and is never put back, so every record is
//! delivered at most once.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::dispatch::Forwarder;
use crate::error::{RelayError, RoutingError};
use crate::record::ResponseRecord;
use crate::routing::RoutingTable;

/// Default worker polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Returned by `enqueue` once the queue has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueClosed;

#[derive(Default)]
struct QueueState {
    records: VecDeque<ResponseRecord>,
    closed: bool,
}

/// Unbounded FIFO of records awaiting delivery.
#[derive(Default)]
pub struct RelayQueue {
    state: Mutex<QueueState>,
}

impl RelayQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a record. Fails only after `close()`.
    pub async fn enqueue(&self, record: ResponseRecord) -> Result<(), QueueClosed> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueClosed);
        }
        debug!(record_id = %record.id, depth = state.records.len() + 1, "Record enqueued");
        state.records.push_back(record);
        Ok(())
    }

    /// Remove the oldest record.
    pub async fn dequeue(&self) -> Option<ResponseRecord> {
        self.state.lock().await.records.pop_front()
    }

    /// Stop accepting records. Already queued records can still be drained.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.records.is_empty()
    }
}

/// Final destination of records drained from a queue.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn deliver(&self, record: &ResponseRecord) -> Result<(), RelayError>;
}

/// Central-dispatcher sink: resolve the routing key, then POST the record.
pub struct RoutedForwarder {
    routes: RoutingTable,
    forwarder: Arc<dyn Forwarder>,
}

impl RoutedForwarder {
    pub fn new(routes: RoutingTable, forwarder: Arc<dyn Forwarder>) -> Self {
        Self { routes, forwarder }
    }
}

#[async_trait]
impl RecordSink for RoutedForwarder {
    async fn deliver(&self, record: &ResponseRecord) -> Result<(), RelayError> {
        let url = self.routes.resolve(&record.routing_key)?;
        self.forwarder.forward(url, record).await?;
        Ok(())
    }
}

/// Outcome of one worker cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The queue was empty; nothing was attempted.
    Idle,
    Delivered,
    /// Delivery failed; the record is gone.
    Dropped,
}

/// Single consumer of a `RelayQueue`.
pub struct RelayWorker {
    name: &'static str,
    queue: Arc<RelayQueue>,
    sink: Arc<dyn RecordSink>,
    interval: Duration,
}

impl RelayWorker {
    pub fn new(
        name: &'static str,
        queue: Arc<RelayQueue>,
        sink: Arc<dyn RecordSink>,
        interval: Duration,
    ) -> Self {
        Self {
            name,
            queue,
            sink,
            interval,
        }
    }

    /// Run one cycle: take at most one record and try to deliver it.
    pub async fn poll_once(&self) -> PollOutcome {
        let Some(record) = self.queue.dequeue().await else {
            return PollOutcome::Idle;
        };

        match self.sink.deliver(&record).await {
            Ok(()) => {
                info!(
                    worker = self.name,
                    record_id = %record.id,
                    routing_key = %record.routing_key,
                    sender = %record.sender_identity,
                    "Record delivered"
                );
                PollOutcome::Delivered
            }
            Err(RelayError::Routing(RoutingError::UnknownKey(key))) => {
                error!(
                    worker = self.name,
                    record_id = %record.id,
                    routing_key = %key,
                    "Unknown routing key, record dropped"
                );
                PollOutcome::Dropped
            }
            Err(e) => {
                error!(
                    worker = self.name,
                    record_id = %record.id,
                    sender = %record.sender_identity,
                    error = %e,
                    "Delivery failed, record dropped"
                );
                PollOutcome::Dropped
            }
        }
    }

    /// Poll forever at the configured cadence. Returns once the queue is
    /// closed and fully drained.
    pub async fn run(self) {
        info!(
            worker = self.name,
            interval_ms = self.interval.as_millis() as u64,
            "Relay worker started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.poll_once().await == PollOutcome::Idle && self.queue.is_closed().await {
                if self.queue.is_empty().await {
                    break;
                }
                warn!(worker = self.name, "Record arrived while closing, draining");
            }
        }

        info!(worker = self.name, "Relay worker stopped");
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
