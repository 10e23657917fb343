//! Topic-keyed publish/subscribe for run events.
//!
//! Each topic owns a `tokio::sync::broadcast` channel created on first
//! subscription. Only receivers subscribed at the time of publishing see an
//! event, and a lagging receiver loses the oldest events rather than
//! blocking the publisher.
//!
//! Terminal events are also remembered per topic, so a subscriber that
//! arrives after a run already finished can still learn its outcome with
//! [`EventBus::outcome`]. The outcome is recorded before it is sent: a
//! caller that subscribes and then checks [`EventBus::outcome`] sees every
//! terminal event either on the receiver or in the record.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use conduit_core::RunId;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::RunEvent;

/// Default per-topic channel capacity.
const DEFAULT_CAPACITY: usize = 64;

/// Terminal events remembered at most; the oldest goes first.
const RECENT_OUTCOMES: usize = 1024;

/// Topic for the events of one run.
pub fn run_topic(run_id: &RunId) -> String {
    format!("run:{run_id}")
}

/// In-process event bus.
#[derive(Debug)]
pub struct EventBus {
    topics: DashMap<String, broadcast::Sender<RunEvent>>,
    outcomes: Mutex<VecDeque<(String, RunEvent)>>,
    capacity: usize,
    published: AtomicU64,
}

impl EventBus {
    /// Bus with the default per-topic capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Bus with a custom per-topic capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            outcomes: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            published: AtomicU64::new(0),
        }
    }

    /// Receive every event published on `topic` from now on.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<RunEvent> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish to the current subscribers of `topic`.
    ///
    /// Returns how many receivers got the event; `0` when nobody listens.
    pub fn broadcast(&self, topic: &str, event: RunEvent) -> usize {
        let _ = self.published.fetch_add(1, Ordering::Relaxed);
        if event.is_terminal() {
            self.remember(topic, event.clone());
        }
        let delivered = match self.topics.get(topic) {
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        };
        if delivered == 0 {
            debug!(topic, "event published with no subscribers");
            self.release(topic);
        }
        delivered
    }

    /// Publish on the run's own topic.
    pub fn publish_run_event(&self, event: RunEvent) -> usize {
        let topic = run_topic(&event.run_id);
        self.broadcast(&topic, event)
    }

    /// Terminal event already published on `topic`, if still remembered.
    pub fn outcome(&self, topic: &str) -> Option<RunEvent> {
        self.outcomes
            .lock()
            .iter()
            .rev()
            .find(|(t, _)| t == topic)
            .map(|(_, event)| event.clone())
    }

    /// Drop the remembered outcome of `topic`.
    pub fn forget_outcome(&self, topic: &str) {
        self.outcomes.lock().retain(|(t, _)| t != topic);
    }

    /// Number of remembered outcomes.
    pub fn outcome_count(&self) -> usize {
        self.outcomes.lock().len()
    }

    fn remember(&self, topic: &str, event: RunEvent) {
        let mut outcomes = self.outcomes.lock();
        if outcomes.len() >= RECENT_OUTCOMES {
            let _ = outcomes.pop_front();
        }
        outcomes.push_back((topic.to_string(), event));
    }

    /// Forget `topic` if nobody is subscribed to it any more.
    pub fn release(&self, topic: &str) {
        let _ = self
            .topics
            .remove_if(topic, |_, tx| tx.receiver_count() == 0);
    }

    /// Number of subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |tx| tx.receiver_count())
    }

    /// Number of topics currently held.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Total events published.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
