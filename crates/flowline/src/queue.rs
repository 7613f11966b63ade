//! The durable work-queue substrate is an external collaborator (§1
//! non-goals): this crate only specifies the interface it dispatches
//! runs, trigger deliveries, schedule ticks, and lifecycle jobs through.
//! An in-memory reference implementation is provided for tests and for
//! running the engine standalone.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The kind of work item, used to pick a visibility timeout and worker
/// pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    WorkflowRun,
    TriggerDelivery,
    ScheduleTick,
    LifecycleJob,
}

/// One item pulled off the substrate. Ordered delivery is guaranteed only
/// among items sharing the same `key`.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub kind: QueueKind,
    pub key: String,
    pub payload: Value,
}

/// Ordered-per-key, at-least-once delivery. Implementations may be a
/// managed queue, a database-backed outbox, or (as here) an in-memory
/// deque used for tests and standalone runs.
#[async_trait]
pub trait QueueSubstrate: Send + Sync {
    async fn enqueue(&self, kind: QueueKind, key: String, payload: Value) -> Result<(), String>;

    /// Pull the next ready item, if any. Returns `None` when the queue is
    /// empty; callers poll or await a notification externally.
    async fn poll(&self, kind: QueueKind) -> Option<QueueItem>;
}

/// FIFO-per-kind reference implementation. Ordering per `key` is
/// preserved trivially because items for the same key are always enqueued
/// by the same logical caller in order and this implementation never
/// reorders within a kind.
#[derive(Default)]
pub struct InMemoryQueue {
    queues: Mutex<std::collections::HashMap<u8, VecDeque<QueueItem>>>,
}

fn kind_tag(kind: QueueKind) -> u8 {
    match kind {
        QueueKind::WorkflowRun => 0,
        QueueKind::TriggerDelivery => 1,
        QueueKind::ScheduleTick => 2,
        QueueKind::LifecycleJob => 3,
    }
}

impl InMemoryQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl QueueSubstrate for InMemoryQueue {
    async fn enqueue(&self, kind: QueueKind, key: String, payload: Value) -> Result<(), String> {
        let mut queues = self.queues.lock().await;
        queues
            .entry(kind_tag(kind))
            .or_default()
            .push_back(QueueItem { kind, key, payload });
        Ok(())
    }

    async fn poll(&self, kind: QueueKind) -> Option<QueueItem> {
        let mut queues = self.queues.lock().await;
        queues.entry(kind_tag(kind)).or_default().pop_front()
    }
}
