//! Agent event fan-out.
//!
//! Subscribers get a bounded channel; the manager never blocks on a slow
//! subscriber. A subscriber whose queue overflows is dropped with a
//! `lagging` log line — consumers re-subscribe on reconnect.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use paseo_domain::event::AgentEvent;

/// Minimum per-subscriber queue depth.
pub const SUBSCRIBER_QUEUE: usize = 256;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<AgentEvent>,
}

pub struct Fanout {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Fanout {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> (u64, mpsc::Receiver<AgentEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().push(Subscriber { id, tx });
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Deliver an event to one subscriber (initial-state replay). Overflow
    /// drops the subscriber, same as `publish`.
    pub fn publish_to(&self, id: u64, event: &AgentEvent) {
        let mut lagging = false;
        {
            let mut subs = self.subscribers.lock();
            subs.retain(|s| {
                if s.id != id {
                    return true;
                }
                match s.tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        lagging = true;
                        false
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                }
            });
        }
        if lagging {
            tracing::warn!(subscriber_id = id, reason = "lagging", "dropped subscriber");
        }
    }

    /// Deliver an event to every subscriber. Never blocks: full queues drop
    /// their subscriber, closed queues are pruned.
    pub fn publish(&self, event: &AgentEvent) {
        let mut dropped: Vec<u64> = Vec::new();
        {
            let mut subs = self.subscribers.lock();
            subs.retain(|s| match s.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped.push(s.id);
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
        for id in dropped {
            tracing::warn!(subscriber_id = id, reason = "lagging", "dropped subscriber");
        }
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn removed_event(id: &str) -> AgentEvent {
        AgentEvent::AgentRemoved {
            agent_id: id.into(),
        }
    }

    #[tokio::test]
    async fn publish_reaches_all_subscribers() {
        let fanout = Fanout::new();
        let (_id1, mut rx1) = fanout.subscribe();
        let (_id2, mut rx2) = fanout.subscribe();

        fanout.publish(&removed_event("a1"));

        assert_eq!(rx1.recv().await.unwrap().agent_id(), "a1");
        assert_eq!(rx2.recv().await.unwrap().agent_id(), "a1");
    }

    #[tokio::test]
    async fn lagging_subscriber_is_dropped() {
        let fanout = Fanout::new();
        let (_id, mut rx) = fanout.subscribe();

        // Overflow the bounded queue without draining.
        for i in 0..SUBSCRIBER_QUEUE + 10 {
            fanout.publish(&removed_event(&format!("a{i}")));
        }
        assert_eq!(fanout.subscriber_count(), 0);

        // Queued events up to the overflow are still readable.
        let first = rx.recv().await.unwrap();
        assert_eq!(first.agent_id(), "a0");
    }

    #[tokio::test]
    async fn closed_subscriber_is_pruned() {
        let fanout = Fanout::new();
        let (_id, rx) = fanout.subscribe();
        drop(rx);

        fanout.publish(&removed_event("a1"));
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_removes() {
        let fanout = Fanout::new();
        let (id, _rx) = fanout.subscribe();
        assert_eq!(fanout.subscriber_count(), 1);
        fanout.unsubscribe(id);
        assert_eq!(fanout.subscriber_count(), 0);
    }
}
