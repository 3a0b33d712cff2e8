//! Event fan-out to subscribed client sinks

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;

use tiller_core::ipc::Event;

/// Identifier handed out on subscribe, used to unsubscribe by identity
pub type SinkId = u64;

struct Sink {
    id: SinkId,
    tx: mpsc::UnboundedSender<String>,
}

/// Fans named events out to every live subscriber.
///
/// Subscribers are pre-serialized-line sinks (one per IPC client). A failed
/// send during publish removes the sink immediately; a slow or broken
/// subscriber loses events during its break but never blocks the others.
pub struct EventBroadcaster {
    next_id: AtomicU64,
    sinks: Mutex<Vec<Sink>>,
}

impl EventBroadcaster {
    /// Create a broadcaster with no subscribers
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            sinks: Mutex::new(Vec::new()),
        }
    }

    /// Append a subscriber and return its id
    pub fn subscribe(&self, tx: mpsc::UnboundedSender<String>) -> SinkId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut sinks = self.sinks.lock().expect("subscriber set lock poisoned");
        sinks.push(Sink { id, tx });
        id
    }

    /// Remove a subscriber by identity. No-op for unknown ids.
    pub fn unsubscribe(&self, id: SinkId) {
        let mut sinks = self.sinks.lock().expect("subscriber set lock poisoned");
        sinks.retain(|s| s.id != id);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sinks.lock().expect("subscriber set lock poisoned").len()
    }

    /// Serialize `{event, payload}` once and write it to every current
    /// subscriber, pruning any whose send fails.
    pub fn publish<P: Serialize>(&self, event: &str, payload: &P) {
        let payload = match serde_json::to_value(payload) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to serialize {} payload: {}", event, e);
                return;
            }
        };

        let envelope = Event {
            event: event.to_string(),
            payload,
        };
        let line = match serde_json::to_string(&envelope) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!("Failed to serialize {} event: {}", event, e);
                return;
            }
        };

        let mut sinks = self.sinks.lock().expect("subscriber set lock poisoned");
        sinks.retain(|sink| {
            if sink.tx.send(line.clone()).is_ok() {
                true
            } else {
                tracing::debug!("Dropping dead event subscriber {}", sink.id);
                false
            }
        });
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let broadcaster = EventBroadcaster::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        broadcaster.subscribe(tx1);
        broadcaster.subscribe(tx2);

        broadcaster.publish("metrics:update", &json!({"status": "ok"}));

        let line1 = rx1.try_recv().unwrap();
        let line2 = rx2.try_recv().unwrap();
        assert_eq!(line1, line2);
        assert!(line1.contains("\"event\":\"metrics:update\""));
    }

    #[test]
    fn test_failed_sink_is_pruned_without_blocking_others() {
        let broadcaster = EventBroadcaster::new();

        // First subscriber's receiver is dropped: its send will fail
        let (tx_dead, rx_dead) = mpsc::unbounded_channel();
        let (tx_live, mut rx_live) = mpsc::unbounded_channel();
        broadcaster.subscribe(tx_dead);
        broadcaster.subscribe(tx_live);
        drop(rx_dead);

        broadcaster.publish("terminal:data", &json!({"id": "t1", "data": "aGk="}));

        // The live subscriber still received the event in the same publish
        let line = rx_live.try_recv().unwrap();
        assert!(line.contains("terminal:data"));

        // The dead subscriber was removed
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe_removes_by_identity() {
        let broadcaster = EventBroadcaster::new();

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        let id1 = broadcaster.subscribe(tx1);
        broadcaster.subscribe(tx2);

        broadcaster.unsubscribe(id1);
        broadcaster.publish("metrics:update", &json!({"status": "ok"}));

        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());

        // Unknown id is a no-op
        broadcaster.unsubscribe(9999);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }
}
