//! Typed publish/subscribe channel for run events
//!
//! Every subscriber owns a bounded queue. Publishing takes a snapshot of the
//! subscriber list and hands the event to each queue in registration order,
//! waiting at most `subscriber_timeout` per subscriber. A subscriber that cannot
//! keep up is dropped for the rest of the run; the run itself never blocks on it
//! for longer than that bound.

use ensemble_core::{Event, RunConfig};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

pub type SubscriberId = u64;

/// Which events a subscriber wants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Everything, including per-chunk deltas
    #[default]
    Streaming,
    /// Everything except `AgentDelta`
    Summary,
}

impl SubscriptionMode {
    fn wants(&self, event: &Event) -> bool {
        match self {
            Self::Streaming => true,
            Self::Summary => !event.is_delta(),
        }
    }
}

struct Slot {
    id: SubscriberId,
    mode: SubscriptionMode,
    tx: mpsc::Sender<Event>,
}

type Snapshot = Arc<Vec<Arc<Slot>>>;

struct Inner {
    slots: RwLock<Snapshot>,
    next_id: AtomicU64,
    closed: AtomicBool,
    buffer: usize,
    subscriber_timeout: Duration,
}

/// Cloneable handle to a run's event bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    pub fn new(buffer: usize, subscriber_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: RwLock::new(Arc::new(Vec::new())),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                buffer: buffer.max(1),
                subscriber_timeout,
            }),
        }
    }

    pub fn from_config(config: &RunConfig) -> Self {
        Self::new(config.subscriber_buffer, config.subscriber_timeout())
    }

    fn snapshot(&self) -> Snapshot {
        let slots = self.inner.slots.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&slots)
    }

    fn update(&self, f: impl FnOnce(&[Arc<Slot>]) -> Vec<Arc<Slot>>) {
        let mut slots = self.inner.slots.write().unwrap_or_else(|e| e.into_inner());
        let next = f(slots.as_slice());
        *slots = Arc::new(next);
    }

    /// Register a subscriber. It only sees events published from now on.
    ///
    /// Subscribing to a closed bus yields a subscription that ends immediately.
    pub fn subscribe(&self, mode: SubscriptionMode) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.buffer);

        if self.is_closed() {
            debug!(subscriber = id, "subscribe on closed bus");
            return Subscription { id, mode, rx };
        }

        let slot = Arc::new(Slot { id, mode, tx });
        self.update(|slots| {
            let mut next = slots.to_vec();
            next.push(slot);
            next
        });
        debug!(subscriber = id, ?mode, "subscriber registered");
        Subscription { id, mode, rx }
    }

    /// Remove a subscriber; its stream ends once drained
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut removed = false;
        self.update(|slots| {
            let before = slots.len();
            let next: Vec<_> = slots.iter().filter(|s| s.id != id).cloned().collect();
            removed = next.len() != before;
            next
        });
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Hand `event` to every current subscriber
    ///
    /// Returns the number of subscribers that accepted it. Publishing on a
    /// closed bus is a no-op.
    pub async fn publish(&self, event: Event) -> usize {
        if self.is_closed() {
            debug!("publish after close discarded");
            return 0;
        }

        let mut delivered = 0;
        for slot in self.snapshot().iter() {
            if !slot.mode.wants(&event) {
                continue;
            }
            match tokio::time::timeout(self.inner.subscriber_timeout, slot.tx.send(event.clone()))
                .await
            {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(_)) => {
                    debug!(subscriber = slot.id, "subscriber went away, removing");
                    self.unsubscribe(slot.id);
                }
                Err(_) => {
                    warn!(
                        subscriber = slot.id,
                        "subscriber did not accept an event within {}ms, dropping it for the rest of the run",
                        self.inner.subscriber_timeout.as_millis()
                    );
                    self.unsubscribe(slot.id);
                }
            }
        }
        delivered
    }

    /// Stop delivery. Later publishes are discarded and every subscription
    /// ends after draining what it already holds.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::SeqCst) {
            self.update(|_| Vec::new());
            debug!("event bus closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving side of one subscriber
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    mode: SubscriptionMode,
    rx: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn mode(&self) -> SubscriptionMode {
        self.mode
    }

    /// Next event, or `None` once the bus closed (or dropped this subscriber)
    /// and the queue is drained
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Collect every remaining event until the stream ends
    pub async fn collect(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    pub fn into_stream(self) -> ReceiverStream<Event> {
        ReceiverStream::new(self.rx)
    }
}
