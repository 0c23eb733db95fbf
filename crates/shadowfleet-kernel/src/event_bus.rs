//! Event bus — fans fleet notifications out to subscribers and keeps a
//! bounded history.

use shadowfleet_types::agent::AgentId;
use shadowfleet_types::event::FleetEvent;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Maximum events retained in the history ring buffer.
const HISTORY_SIZE: usize = 1000;

/// Broadcast channel for fleet notifications.
pub struct EventBus {
    sender: broadcast::Sender<FleetEvent>,
    history: Arc<RwLock<VecDeque<FleetEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            history: Arc::new(RwLock::new(VecDeque::with_capacity(HISTORY_SIZE))),
        }
    }

    /// Publish one notification.
    pub async fn publish(&self, event: FleetEvent) {
        debug!(agent = %event.agent_id, kind = ?event.kind, "Publishing fleet event");

        {
            let mut history = self.history.write().await;
            if history.len() >= HISTORY_SIZE {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub async fn publish_all(&self, events: Vec<FleetEvent>) {
        for event in events {
            self.publish(event).await;
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.sender.subscribe()
    }

    /// Most recent events, newest first.
    pub async fn history(&self, limit: usize) -> Vec<FleetEvent> {
        let history = self.history.read().await;
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Most recent events about one agent, newest first.
    pub async fn history_for(&self, agent_id: &AgentId, limit: usize) -> Vec<FleetEvent> {
        let history = self.history.read().await;
        history
            .iter()
            .rev()
            .filter(|e| &e.agent_id == agent_id)
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use shadowfleet_types::event::FleetEventKind;

    fn event(agent: &str, kind: FleetEventKind) -> FleetEvent {
        FleetEvent::new(AgentId::new(agent), Utc::now(), kind)
    }

    #[tokio::test]
    async fn test_publish_and_history() {
        let bus = EventBus::new();
        bus.publish(event("a1", FleetEventKind::ShadowCreated)).await;
        bus.publish(event("a2", FleetEventKind::Offboarded)).await;

        let history = bus.history(10).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, FleetEventKind::Offboarded);

        let for_a1 = bus.history_for(&AgentId::new("a1"), 10).await;
        assert_eq!(for_a1.len(), 1);
    }

    #[tokio::test]
    async fn test_subscriber_receives() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(event("a1", FleetEventKind::Evicted)).await;
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, FleetEventKind::Evicted);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let bus = EventBus::new();
        let events = (0..HISTORY_SIZE + 5)
            .map(|_| event("a1", FleetEventKind::ShadowCreated))
            .collect();
        bus.publish_all(events).await;
        assert_eq!(bus.history(usize::MAX).await.len(), HISTORY_SIZE);
    }
}
