//! Typed runtime configuration.
//!
//! Mirrors the teacher's `TracingConfig` shape (builder methods over a
//! plain struct with documented defaults) but covers the tunables implied
//! across the orchestration and lifecycle components: service-client
//! timeouts, compaction chunk sizing, throttle defaults, retention, and
//! auto-materialize cooldown.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide configuration, constructed once at startup and threaded
/// explicitly through [`crate::Flowline`] rather than read from globals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runtime {
    /// Timeout applied to calls against the external service/job runtime.
    pub service_client_timeout_ms: u64,

    /// Maximum number of partitions materialized per compaction chunk.
    pub chunk_partition_limit: usize,

    /// Target output size (bytes) for a compacted partition.
    pub target_partition_bytes: u64,

    /// Partitions at or below this size are eligible for compaction.
    pub small_partition_bytes: u64,

    /// Maximum partitions grouped into one compaction unit.
    pub max_partitions_per_group: usize,

    /// Default throttle window (ms) for triggers that don't specify one.
    pub default_throttle_window_ms: u64,

    /// Default throttle count for triggers that don't specify one.
    pub default_throttle_count: u32,

    /// Audit log retention, in hours.
    pub audit_log_ttl_hours: u64,

    /// Max audit rows deleted per pruner batch.
    pub audit_prune_batch_size: usize,

    /// Consecutive trigger failures before auto-pause kicks in.
    pub trigger_failure_threshold: u32,

    /// Base backoff (ms) for trigger/source auto-pause.
    pub pause_backoff_base_ms: u64,

    /// Base cooldown (ms) for auto-materialize claim failures; the actual
    /// cooldown grows with the failure count (see [`crate::assets`]).
    pub auto_materialize_cooldown_base_ms: u64,

    /// Max chunk-history entries retained per compaction checkpoint.
    pub compaction_history_cap: usize,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            service_client_timeout_ms: 60_000,
            chunk_partition_limit: 50,
            target_partition_bytes: 512 * 1024 * 1024,
            small_partition_bytes: 64 * 1024 * 1024,
            max_partitions_per_group: 50,
            default_throttle_window_ms: 60_000,
            default_throttle_count: 10,
            audit_log_ttl_hours: 24 * 30,
            audit_prune_batch_size: 1_000,
            trigger_failure_threshold: 5,
            pause_backoff_base_ms: 30_000,
            auto_materialize_cooldown_base_ms: 60_000,
            compaction_history_cap: 50,
        }
    }
}

impl Runtime {
    /// Load overrides from `FLOWLINE_*` environment variables, falling
    /// back to [`Runtime::default`] for anything unset or unparsable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_u64("FLOWLINE_SERVICE_CLIENT_TIMEOUT_MS") {
            cfg.service_client_timeout_ms = v;
        }
        if let Some(v) = env_usize("FLOWLINE_CHUNK_PARTITION_LIMIT") {
            cfg.chunk_partition_limit = v;
        }
        if let Some(v) = env_u64("FLOWLINE_TARGET_PARTITION_BYTES") {
            cfg.target_partition_bytes = v;
        }
        if let Some(v) = env_u64("FLOWLINE_SMALL_PARTITION_BYTES") {
            cfg.small_partition_bytes = v;
        }
        if let Some(v) = env_usize("FLOWLINE_MAX_PARTITIONS_PER_GROUP") {
            cfg.max_partitions_per_group = v;
        }
        if let Some(v) = env_u64("FLOWLINE_AUDIT_LOG_TTL_HOURS") {
            cfg.audit_log_ttl_hours = v;
        }
        if let Some(v) = env_u64("FLOWLINE_PAUSE_BACKOFF_BASE_MS") {
            cfg.pause_backoff_base_ms = v;
        }
        cfg
    }

    pub fn service_client_timeout(&self) -> Duration {
        Duration::from_millis(self.service_client_timeout_ms)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}
