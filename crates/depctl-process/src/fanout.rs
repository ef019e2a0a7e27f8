use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::types::{CorrelationKey, StreamEvent};

const CHANNEL_CAPACITY: usize = 1024;

/// Fan-out publisher keyed by `(operationKind, correlationId)`. Any number
/// of late-joining subscribers may attach; each only observes events
/// published after it subscribes. Publishing never blocks — a subscriber
/// that falls behind the channel capacity drops its backlog rather than
/// slowing the publisher (native `tokio::sync::broadcast` behavior).
#[derive(Clone, Default)]
pub struct FanOutRegistry {
    channels: Arc<Mutex<HashMap<CorrelationKey, broadcast::Sender<StreamEvent>>>>,
}

impl FanOutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn sender(&self, key: &CorrelationKey) -> broadcast::Sender<StreamEvent> {
        let mut guard = self.channels.lock().await;
        guard
            .entry(key.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// Attaches a new subscriber, creating the channel if this is the first
    /// subscriber for `key`.
    pub async fn subscribe(&self, key: &CorrelationKey) -> broadcast::Receiver<StreamEvent> {
        self.sender(key).await.subscribe()
    }

    /// Publishes an event. A no-op if nobody is subscribed.
    pub async fn publish(&self, key: &CorrelationKey, event: StreamEvent) {
        let sender = self.sender(key).await;
        let _ = sender.send(event);
    }

    /// Drops the channel for `key` once no subscribers remain and no more
    /// publishes are expected — called after the terminal `End` event.
    pub async fn retire(&self, key: &CorrelationKey) {
        self.channels.lock().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn late_subscriber_only_sees_future_events() {
        let registry = FanOutRegistry::new();
        let key = CorrelationKey::new("build", "tag-1");

        registry.publish(&key, StreamEvent::Stdout { text: "before".into(), at: Utc::now() }).await;

        let mut rx = registry.subscribe(&key).await;
        registry.publish(&key, StreamEvent::Stdout { text: "after".into(), at: Utc::now() }).await;

        let event = rx.recv().await.unwrap();
        match event {
            StreamEvent::Stdout { text, .. } => assert_eq!(text, "after"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let registry = FanOutRegistry::new();
        let key = CorrelationKey::new("logs", "c1");
        let mut a = registry.subscribe(&key).await;
        let mut b = registry.subscribe(&key).await;

        registry.publish(&key, StreamEvent::End { exit_code: 0, final_output: "done".into(), at: Utc::now() }).await;

        assert!(matches!(a.recv().await.unwrap(), StreamEvent::End { exit_code: 0, .. }));
        assert!(matches!(b.recv().await.unwrap(), StreamEvent::End { exit_code: 0, .. }));
    }
}
