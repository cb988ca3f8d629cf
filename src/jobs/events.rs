//! Fan-out of job events to any number of subscribers.
//!
//! Each subscriber gets its own bounded channel. Delivery uses `try_send`,
//! so a slow subscriber loses events instead of stalling the worker, and a
//! subscriber whose receiver was dropped is removed on the next notify.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::model::JobEvent;

/// Default per-subscriber buffer.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// A live subscription. Drop it (or call `unsubscribe`) to stop receiving.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub receiver: mpsc::Receiver<JobEvent>,
}

#[derive(Debug)]
pub struct ProgressBroadcaster {
    observers: Mutex<Vec<(u64, mpsc::Sender<JobEvent>)>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl ProgressBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    fn observers(&self) -> std::sync::MutexGuard<'_, Vec<(u64, mpsc::Sender<JobEvent>)>> {
        self.observers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.observers().push((id, tx));
        tracing::debug!(subscriber = id, "event subscriber added");
        Subscription { id, receiver: rx }
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut observers = self.observers();
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers().len()
    }

    /// Deliver `event` to every subscriber without blocking.
    /// Returns how many subscribers received it.
    pub fn notify(&self, event: &JobEvent) -> usize {
        let mut delivered = 0;
        self.observers().retain(|(id, tx)| match tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::warn!(subscriber = id, job = %event.id, "subscriber lagging, event dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(subscriber = id, "event subscriber gone, removing");
                false
            }
        });
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::{Job, JobEventKind};
    use serde_json::Map;

    fn event() -> JobEvent {
        JobEvent::from_job(JobEventKind::Created, &Job::new("x", Map::new()))
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_events() {
        let broadcaster = ProgressBroadcaster::new(8);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        assert_ne!(a.id, b.id);

        let ev = event();
        assert_eq!(broadcaster.notify(&ev), 2);
        assert_eq!(a.receiver.recv().await.unwrap(), ev);
        assert_eq!(b.receiver.recv().await.unwrap(), ev);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let broadcaster = ProgressBroadcaster::new(8);
        let a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        assert!(broadcaster.unsubscribe(a.id));
        assert!(!broadcaster.unsubscribe(a.id));

        assert_eq!(broadcaster.notify(&event()), 1);
        assert!(b.receiver.recv().await.is_some());
    }

    #[test]
    fn test_dropped_subscriber_is_removed() {
        let broadcaster = ProgressBroadcaster::new(8);
        let a = broadcaster.subscribe();
        let _b = broadcaster.subscribe();
        drop(a);

        assert_eq!(broadcaster.notify(&event()), 1);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn test_full_subscriber_drops_events_but_stays() {
        let broadcaster = ProgressBroadcaster::new(1);
        let mut slow = broadcaster.subscribe();

        assert_eq!(broadcaster.notify(&event()), 1);
        assert_eq!(broadcaster.notify(&event()), 0);
        assert_eq!(broadcaster.subscriber_count(), 1);

        assert!(slow.receiver.try_recv().is_ok());
        assert!(slow.receiver.try_recv().is_err());
        assert_eq!(broadcaster.notify(&event()), 1);
    }

    #[test]
    fn test_notify_without_subscribers() {
        let broadcaster = ProgressBroadcaster::default();
        assert_eq!(broadcaster.notify(&event()), 0);
    }
}
