//! Per-sender message aggregation with a debounce timer.
//!
//! Every message restarts its sender's quiet-period timer. When the timer
//! fires the buffered texts are joined with newlines and sent as one
//! dispatch. The buffer is taken out of the shared map before the network
//! call, so other senders (and new messages from the same sender) never
//! wait on the backend.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;

/// Default quiet period before a sender's buffer is flushed.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_secs(15);

/// Pending texts for one sender plus the timer that will flush them.
struct SenderSlot {
    texts: Vec<String>,
    /// Identifies the live timer. A timer whose generation no longer matches
    /// has been superseded and must not flush.
    generation: u64,
    timer: JoinHandle<()>,
}

struct AggregatorInner {
    routing_key: String,
    quiet_period: Duration,
    dispatcher: Arc<dyn Dispatcher>,
    slots: Mutex<HashMap<String, SenderSlot>>,
    next_generation: AtomicU64,
}

/// Debouncing aggregator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Aggregator {
    inner: Arc<AggregatorInner>,
}

impl Aggregator {
    /// Create an aggregator that tags its dispatches with `routing_key`.
    pub fn new(
        routing_key: impl Into<String>,
        quiet_period: Duration,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            inner: Arc::new(AggregatorInner {
                routing_key: routing_key.into(),
                quiet_period,
                dispatcher,
                slots: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.inner.routing_key
    }

    /// Buffer `text` for `sender_identity` and restart its quiet-period timer.
    ///
    /// Messages without a sender identity are logged and ignored.
    pub async fn on_message(&self, sender_identity: &str, text: &str) {
        if sender_identity.trim().is_empty() {
            warn!("Message from sender without identity, skipping");
            return;
        }

        let mut slots = self.inner.slots.lock().await;
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let timer = self.schedule(sender_identity.to_string(), generation);

        match slots.entry(sender_identity.to_string()) {
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                slot.timer.abort();
                slot.timer = timer;
                slot.generation = generation;
                slot.texts.push(text.to_string());
                debug!(
                    sender = sender_identity,
                    buffered = slot.texts.len(),
                    "Quiet period restarted"
                );
            }
            Entry::Vacant(entry) => {
                entry.insert(SenderSlot {
                    texts: vec![text.to_string()],
                    generation,
                    timer,
                });
                debug!(sender = sender_identity, "Buffer created");
            }
        }

        info!(sender = sender_identity, text, "Message buffered");
    }

    /// Flush every pending buffer now, cancelling the timers. Used on shutdown.
    pub async fn flush_all(&self) -> usize {
        let drained: Vec<(String, Vec<String>)> = {
            let mut slots = self.inner.slots.lock().await;
            slots
                .drain()
                .map(|(sender, slot)| {
                    slot.timer.abort();
                    (sender, slot.texts)
                })
                .collect()
        };

        let count = drained.len();
        futures::future::join_all(
            drained
                .into_iter()
                .map(|(sender, texts)| async move { self.inner.send(&sender, texts).await }),
        )
        .await;

        if count > 0 {
            info!(count, "Flushed pending buffers");
        }
        count
    }

    /// Senders with a pending buffer, sorted.
    pub async fn pending_senders(&self) -> Vec<String> {
        let mut senders: Vec<String> = self.inner.slots.lock().await.keys().cloned().collect();
        senders.sort();
        senders
    }

    /// Texts currently buffered for `sender_identity`.
    pub async fn buffered(&self, sender_identity: &str) -> Option<Vec<String>> {
        self.inner
            .slots
            .lock()
            .await
            .get(sender_identity)
            .map(|slot| slot.texts.clone())
    }

    fn schedule(&self, sender_identity: String, generation: u64) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::time::sleep(inner.quiet_period).await;
            inner.flush(&sender_identity, generation).await;
        })
    }
}

impl AggregatorInner {
    /// Timer callback: take the buffer if this timer is still the live one.
    async fn flush(&self, sender_identity: &str, generation: u64) {
        let texts = {
            let mut slots = self.slots.lock().await;
            match slots.get(sender_identity) {
                Some(slot) if slot.generation == generation => {
                    slots.remove(sender_identity).map(|slot| slot.texts)
                }
                _ => None,
            }
        };

        match texts {
            Some(texts) => self.send(sender_identity, texts).await,
            None => debug!(sender = sender_identity, generation, "Stale timer ignored"),
        }
    }

    /// Dispatch the combined text. Failures drop the text.
    async fn send(&self, sender_identity: &str, texts: Vec<String>) {
        let parts = texts.len();
        let combined = texts.join("\n");

        match self
            .dispatcher
            .dispatch(&self.routing_key, sender_identity, &combined)
            .await
        {
            Ok(()) => info!(
                sender = sender_identity,
                parts,
                text = %combined,
                "Combined message dispatched"
            ),
            Err(e) => error!(
                sender = sender_identity,
                parts,
                error = %e,
                "Combined message dropped after failed dispatch"
            ),
        }
    }
}
