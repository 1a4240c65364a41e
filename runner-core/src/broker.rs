//! Event Broker (C1): pub/sub fan-out to many live subscribers with
//! bounded, per-subscriber buffers. Producers never block — a full
//! subscriber queue silently drops the event for that subscriber only.
//!
//! Modelled after the mutex-guarded, `try_send`-based registry sketched
//! in `ailetos::notification_queue_design`, simplified from "one channel
//! per handle, many subscribers" to "one channel per subscriber, every
//! publish fans out to all of them".

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{Result, SupervisorError};
use crate::events::Event;

pub const DEFAULT_MAX_SUBSCRIBERS: usize = 100;
pub const DEFAULT_QUEUE_CAPACITY: usize = 7000;

pub type SubscriberId = u64;

struct Inner {
    subscribers: Mutex<HashMap<SubscriberId, mpsc::Sender<Event>>>,
    next_id: AtomicU64,
    max_subscribers: usize,
    queue_capacity: usize,
}

/// Cheap to clone; all clones share the same subscriber registry.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    pub fn new(max_subscribers: usize, queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                max_subscribers,
                queue_capacity,
            }),
        }
    }

    pub fn subscribe(&self) -> Result<(SubscriberId, mpsc::Receiver<Event>)> {
        let mut subs = self.inner.subscribers.lock();
        if subs.len() >= self.inner.max_subscribers {
            return Err(SupervisorError::Overloaded(format!(
                "subscriber cap of {} reached",
                self.inner.max_subscribers
            )));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        subs.insert(id, tx);
        Ok((id, rx))
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.subscribers.lock().remove(&id);
    }

    /// Non-blocking. Publishes to every live subscriber; a subscriber
    /// whose queue is full is skipped for this event only. A subscriber
    /// whose receiver has been dropped is pruned from the registry.
    pub fn publish(&self, event: Event) {
        let mut dead = Vec::new();
        {
            let subs = self.inner.subscribers.lock();
            for (id, tx) in subs.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }
        if !dead.is_empty() {
            let mut subs = self.inner.subscribers.lock();
            for id in dead {
                subs.remove(&id);
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUBSCRIBERS, DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fan_out_preserves_order_without_reordering() {
        let broker = Broker::new(10, 10);
        let (_id1, mut rx1) = broker.subscribe().unwrap();
        let (_id2, mut rx2) = broker.subscribe().unwrap();

        for i in 0..5u32 {
            broker.publish(Event::Output {
                ts: "t".to_string(),
                runner_id: "r".to_string(),
                line: i.to_string(),
            });
        }

        for i in 0..5u32 {
            let Event::Output { line, .. } = rx1.recv().await.unwrap() else {
                panic!("wrong event");
            };
            assert_eq!(line, i.to_string());
            let Event::Output { line, .. } = rx2.recv().await.unwrap() else {
                panic!("wrong event");
            };
            assert_eq!(line, i.to_string());
        }
    }

    #[tokio::test]
    async fn full_queue_drops_silently_for_that_subscriber_only() {
        let broker = Broker::new(10, 1);
        let (_id, mut rx) = broker.subscribe().unwrap();
        broker.publish(Event::Output {
            ts: "t".to_string(),
            runner_id: "r".to_string(),
            line: "first".to_string(),
        });
        // Queue is now full (capacity 1); this publish must not panic or block.
        broker.publish(Event::Output {
            ts: "t".to_string(),
            runner_id: "r".to_string(),
            line: "dropped".to_string(),
        });
        let Event::Output { line, .. } = rx.recv().await.unwrap() else {
            panic!("wrong event");
        };
        assert_eq!(line, "first");
    }

    #[test]
    fn subscribe_fails_past_cap() {
        let broker = Broker::new(1, 10);
        let _first = broker.subscribe().unwrap();
        let second = broker.subscribe();
        assert!(matches!(second, Err(SupervisorError::Overloaded(_))));
    }

    #[tokio::test]
    async fn unsubscribe_discards_further_events() {
        let broker = Broker::new(10, 10);
        let (id, mut rx) = broker.subscribe().unwrap();
        broker.unsubscribe(id);
        broker.publish(Event::Output {
            ts: "t".to_string(),
            runner_id: "r".to_string(),
            line: "x".to_string(),
        });
        assert!(rx.recv().await.is_none());
    }
}
