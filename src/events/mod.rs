//! Event publisher
//!
//! Wraps a `tokio::sync::broadcast::Sender<Event>` the same way the rest
//! of this codebase's process-wide event bus does, generalized to a
//! per-session instance owned by the coordinator, plus a capped
//! `VecDeque<Event>` history ring for late subscribers and
//! `get_event_history`.

use std::collections::VecDeque;
use tokio::sync::{broadcast, RwLock};

use crate::domain::Event;

const CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_HISTORY_CAP: usize = 2000;

pub struct EventPublisher {
    tx: broadcast::Sender<Event>,
    history: RwLock<VecDeque<Event>>,
    history_cap: usize,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::with_history_cap(DEFAULT_HISTORY_CAP)
    }

    pub fn with_history_cap(history_cap: usize) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx, history: RwLock::new(VecDeque::new()), history_cap }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event. A failed send (no receivers) is swallowed and
    /// logged, matching this codebase's existing event bus: losing a
    /// live subscriber is never a reason to fail the node that produced
    /// the event.
    pub async fn publish(&self, event: Event) {
        {
            let mut history = self.history.write().await;
            history.push_back(event.clone());
            while history.len() > self.history_cap {
                history.pop_front();
            }
        }
        if self.tx.send(event).is_err() {
            tracing::debug!("event published with no active subscribers");
        }
    }

    pub async fn history(&self) -> Vec<Event> {
        self.history.read().await.iter().cloned().collect()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventData;

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let publisher = EventPublisher::new();
        publisher.publish(Event::new("s1", None, EventData::VotingStarted)).await;
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let publisher = EventPublisher::new();
        let mut rx = publisher.subscribe();
        publisher.publish(Event::new("s1", None, EventData::VotingStarted)).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, "voting_started");
    }

    #[tokio::test]
    async fn history_caps_at_configured_size() {
        let publisher = EventPublisher::with_history_cap(3);
        for _ in 0..5 {
            publisher.publish(Event::new("s1", None, EventData::VotingStarted)).await;
        }
        assert_eq!(publisher.history().await.len(), 3);
    }
}
