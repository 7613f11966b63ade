//! Retention evaluation (§4.4): expires partitions past a dataset's
//! retention policy via `replacePartitionsInManifest`.

use crate::clock::SharedClock;
use crate::error::FlowResult;
use crate::event_bus::EventBus;
use crate::ids::ManifestId;
use crate::manifest_cache::ManifestCache;
use crate::manifest_store::{ManifestStore, ReplacePartitions};
use serde_json::json;
use std::sync::Arc;

/// Max age and/or max size, evaluated independently; a partition expires
/// if either bound is exceeded.
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
    pub max_age_ms: Option<u64>,
    pub max_total_bytes: Option<i64>,
}

pub struct RetentionEngine {
    store: Arc<dyn ManifestStore>,
    cache: Arc<ManifestCache>,
    event_bus: Arc<dyn EventBus>,
    clock: SharedClock,
}

impl RetentionEngine {
    pub fn new(
        store: Arc<dyn ManifestStore>,
        cache: Arc<ManifestCache>,
        event_bus: Arc<dyn EventBus>,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            cache,
            event_bus,
            clock,
        }
    }

    /// Evaluate `policy` against `manifest_id`'s current partitions and
    /// expire anything past it. Returns the number of partitions expired.
    pub async fn evaluate(
        &self,
        manifest_id: ManifestId,
        policy: &RetentionPolicy,
    ) -> FlowResult<usize> {
        let manifest = self.store.get_manifest(manifest_id).await?;
        let now = self.clock.now();

        let mut expired = Vec::new();
        let mut cumulative_bytes: i64 = 0;
        let mut by_age_newest_first = manifest.partitions.clone();
        by_age_newest_first.sort_by_key(|p| std::cmp::Reverse(p.end_time));

        for partition in &by_age_newest_first {
            let mut should_expire = false;
            if let Some(max_age_ms) = policy.max_age_ms {
                let age_ms = (now - partition.end_time).num_milliseconds().max(0) as u64;
                if age_ms > max_age_ms {
                    should_expire = true;
                }
            }
            cumulative_bytes += partition.file_size_bytes.unwrap_or(0);
            if let Some(max_total_bytes) = policy.max_total_bytes {
                if cumulative_bytes > max_total_bytes {
                    should_expire = true;
                }
            }
            if should_expire {
                expired.push(partition.id);
            }
        }

        if expired.is_empty() {
            return Ok(0);
        }

        let result = self
            .store
            .replace_partitions_in_manifest(
                manifest_id,
                ReplacePartitions {
                    remove: expired.clone(),
                    add: Vec::new(),
                    summary_patch: serde_json::Value::Null,
                    metadata_patch: serde_json::Value::Null,
                },
            )
            .await?;

        for partition_id in &expired {
            self.event_bus.publish(
                "retention.partition.expired",
                json!({"partitionId": partition_id.0, "manifestId": manifest_id.0}),
            );
        }

        self.cache.invalidate(result.manifest.dataset_id, &result.manifest.manifest_shard);
        Ok(expired.len())
    }
}
