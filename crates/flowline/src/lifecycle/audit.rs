//! Periodic audit-log pruner: deletes `dataset_access_audit` rows older
//! than `ttlHours` in bounded batches. Safe to stop mid-run — each batch
//! is a self-contained unit of work.

use crate::clock::SharedClock;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// One audit row. The real store (Postgres-backed) indexes these by
/// `recorded_at` for efficient batch deletion; the in-memory store used
/// here is a plain append log, adequate for tests.
#[derive(Debug, Clone)]
pub struct AuditRow {
    pub dataset_slug: String,
    pub actor: String,
    pub action: String,
    pub recorded_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, row: AuditRow);
    /// Delete up to `batch_size` rows older than `cutoff`. Returns the
    /// number deleted; callers loop until it returns 0.
    async fn prune_batch(&self, cutoff: DateTime<Utc>, batch_size: usize) -> usize;
}

#[derive(Default)]
pub struct InMemoryAuditLog {
    rows: Mutex<Vec<AuditRow>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait::async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn record(&self, row: AuditRow) {
        self.rows.lock().await.push(row);
    }

    async fn prune_batch(&self, cutoff: DateTime<Utc>, batch_size: usize) -> usize {
        let mut rows = self.rows.lock().await;
        let mut removed = 0;
        let mut i = 0;
        while i < rows.len() && removed < batch_size {
            if rows[i].recorded_at < cutoff {
                rows.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
        removed
    }
}

pub struct AuditPruner {
    log: Arc<dyn AuditLog>,
    clock: SharedClock,
    ttl_hours: u64,
    batch_size: usize,
}

impl AuditPruner {
    pub fn new(log: Arc<dyn AuditLog>, clock: SharedClock, ttl_hours: u64, batch_size: usize) -> Self {
        Self {
            log,
            clock,
            ttl_hours,
            batch_size,
        }
    }

    /// Run to completion (all batches), returning the total rows deleted.
    /// A caller wanting a cancellable long-running task should instead
    /// call this repeatedly from a cancellable loop — each invocation is
    /// already a single bounded unit of work.
    pub async fn run_once(&self) -> usize {
        let cutoff = self.clock.now() - chrono::Duration::hours(self.ttl_hours as i64);
        let mut total = 0;
        loop {
            let deleted = self.log.prune_batch(cutoff, self.batch_size).await;
            total += deleted;
            if deleted < self.batch_size {
                break;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use chrono::Duration;

    #[tokio::test]
    async fn prunes_only_rows_older_than_ttl() {
        let log = InMemoryAuditLog::new();
        let now = Utc::now();
        log.record(AuditRow {
            dataset_slug: "events".into(),
            actor: "system".into(),
            action: "compact".into(),
            recorded_at: now - Duration::hours(100),
        })
        .await;
        log.record(AuditRow {
            dataset_slug: "events".into(),
            actor: "system".into(),
            action: "compact".into(),
            recorded_at: now,
        })
        .await;

        let pruner = AuditPruner::new(log.clone(), system_clock(), 24, 100);
        let deleted = pruner.run_once().await;
        assert_eq!(deleted, 1);
        assert_eq!(log.rows.lock().await.len(), 1);
    }
}
