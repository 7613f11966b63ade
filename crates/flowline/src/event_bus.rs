//! A pub/sub event bus delivering domain events to subscribers is an
//! external collaborator (§1 non-goals). This is the interface C4/C6/C7
//! publish audit and lifecycle events through, plus a broadcast-backed
//! reference implementation.

use serde_json::Value;
use tokio::sync::broadcast;

/// A published domain event: `compaction.group.compacted`,
/// `retention.partition.expired`, `trigger_paused`, `source_paused`, etc.
#[derive(Debug, Clone)]
pub struct DomainEvent {
    pub topic: String,
    pub payload: Value,
}

pub trait EventBus: Send + Sync {
    fn publish(&self, topic: &str, payload: Value);
}

/// `tokio::sync::broadcast`-backed bus. Lagging subscribers drop the
/// oldest events rather than block publishers; this is acceptable because
/// the bus is observability-only, never the system of record.
pub struct BroadcastEventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus for BroadcastEventBus {
    fn publish(&self, topic: &str, payload: Value) {
        let _ = self.sender.send(DomainEvent {
            topic: topic.to_string(),
            payload,
        });
    }
}
