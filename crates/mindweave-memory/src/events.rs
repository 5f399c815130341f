//! Event sinks: a no-op sink and an in-process bus with per-agent
//! subscriptions and a history ring buffer.

use dashmap::DashMap;
use mindweave_types::agent::AgentId;
use mindweave_types::event::MemoryEvent;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum events retained in the history ring buffer.
const HISTORY_SIZE: usize = 1000;

/// Receives memory events. Emission never fails and never blocks on
/// subscribers.
pub trait EventSink: Send + Sync {
    /// Deliver an event.
    fn emit(&self, event: MemoryEvent);
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: MemoryEvent) {}
}

/// Broadcast bus for memory events.
pub struct MemoryEventBus {
    /// Broadcast channel for all events.
    sender: broadcast::Sender<MemoryEvent>,
    /// Per-agent event channels.
    agent_channels: DashMap<AgentId, broadcast::Sender<MemoryEvent>>,
    /// Event history ring buffer.
    history: Mutex<VecDeque<MemoryEvent>>,
}

impl MemoryEventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            sender,
            agent_channels: DashMap::new(),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_SIZE)),
        }
    }

    /// Publish an event to every subscriber and record it in the history.
    pub fn publish(&self, event: MemoryEvent) {
        debug!(
            event_id = %event.id,
            agent = %event.agent_id,
            "Publishing memory event"
        );

        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() >= HISTORY_SIZE {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        if let Some(sender) = self.agent_channels.get(&event.agent_id) {
            let _ = sender.send(event.clone());
        }
        let _ = self.sender.send(event);
    }

    /// Subscribe to one agent's events.
    pub fn subscribe_agent(&self, agent_id: AgentId) -> broadcast::Receiver<MemoryEvent> {
        let entry = self.agent_channels.entry(agent_id).or_insert_with(|| {
            let (tx, _) = broadcast::channel(256);
            tx
        });
        entry.subscribe()
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&self) -> broadcast::Receiver<MemoryEvent> {
        self.sender.subscribe()
    }

    /// Most recent events, newest first.
    pub fn history(&self, limit: usize) -> Vec<MemoryEvent> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Drop an agent's channel.
    pub fn unsubscribe_agent(&self, agent_id: &AgentId) {
        self.agent_channels.remove(agent_id);
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for MemoryEventBus {
    fn emit(&self, event: MemoryEvent) {
        self.publish(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindweave_types::event::MemoryEventPayload;

    fn event(agent: &str, count: u64) -> MemoryEvent {
        MemoryEvent::new(
            AgentId::from(agent),
            MemoryEventPayload::NodesDecayed { count },
        )
    }

    #[test]
    fn test_publish_and_history() {
        let bus = MemoryEventBus::new();
        bus.publish(event("agent-1", 1));
        bus.publish(event("agent-1", 2));
        let history = bus.history(10);
        assert_eq!(history.len(), 2);
        assert_eq!(
            history[0].payload,
            MemoryEventPayload::NodesDecayed { count: 2 }
        );
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = MemoryEventBus::new();
        for i in 0..(HISTORY_SIZE as u64 + 5) {
            bus.publish(event("agent-1", i));
        }
        assert_eq!(bus.history(usize::MAX).len(), HISTORY_SIZE);
    }

    #[tokio::test]
    async fn test_agent_subscribe() {
        let bus = MemoryEventBus::new();
        let mut rx = bus.subscribe_agent(AgentId::from("agent-1"));
        let mut all = bus.subscribe_all();

        bus.emit(event("agent-2", 7));
        bus.emit(event("agent-1", 3));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.agent_id.as_str(), "agent-1");
        assert_eq!(
            received.payload,
            MemoryEventPayload::NodesDecayed { count: 3 }
        );
        assert_eq!(all.recv().await.unwrap().agent_id.as_str(), "agent-2");
    }

    #[test]
    fn test_noop_sink() {
        NoopSink.emit(event("agent-1", 1));
    }
}
