//! Out-of-band dataset lifecycle jobs (compaction, retention) against a
//! durable manifest store.
//!
//! Unlike `run`/`replay`/`diff`/`timeline`, these operate on datasets and
//! manifests that already exist in Postgres, so they need a real
//! connection rather than an in-memory stand-in.

use crate::output::{print_info, print_success};
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use flowline::clock::system_clock;
use flowline::config::Runtime;
use flowline::ids::{DatasetId, ManifestId};
use flowline::lifecycle::retention::RetentionPolicy;
use flowline::manifest_cache::ManifestCache;
use flowline::lifecycle::{CompactionEngine, RetentionEngine};
use flowline::event_bus::{BroadcastEventBus, EventBus};
use flowline_postgres_store::PostgresManifestStore;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Args)]
pub struct LifecycleArgs {
    #[command(subcommand)]
    command: LifecycleCommand,
}

#[derive(Subcommand)]
enum LifecycleCommand {
    /// Compact small partitions of a manifest into fewer, larger ones
    Compact(CompactArgs),
    /// Expire partitions of a manifest past a retention policy
    Retain(RetainArgs),
}

#[derive(Args)]
struct CompactArgs {
    /// PostgreSQL connection string for the manifest store
    #[arg(long)]
    postgres_url: String,

    /// Dataset id the manifest belongs to
    #[arg(long)]
    dataset_id: Uuid,

    /// Manifest id to compact
    #[arg(long)]
    manifest_id: Uuid,
}

#[derive(Args)]
struct RetainArgs {
    /// PostgreSQL connection string for the manifest store
    #[arg(long)]
    postgres_url: String,

    /// Manifest id to evaluate
    #[arg(long)]
    manifest_id: Uuid,

    /// Expire partitions whose end time is older than this many hours
    #[arg(long)]
    max_age_hours: Option<u64>,

    /// Expire the oldest partitions once the manifest exceeds this total size
    #[arg(long)]
    max_total_bytes: Option<i64>,
}

pub async fn run(args: LifecycleArgs) -> Result<()> {
    match args.command {
        LifecycleCommand::Compact(args) => compact(args).await,
        LifecycleCommand::Retain(args) => retain(args).await,
    }
}

async fn compact(args: CompactArgs) -> Result<()> {
    let config = Runtime::default();
    let clock = system_clock();
    let store: Arc<dyn flowline::manifest_store::ManifestStore> = Arc::new(
        PostgresManifestStore::new(&args.postgres_url)
            .await
            .context("connecting to the Postgres manifest store")?,
    );
    let cache = Arc::new(ManifestCache::new(
        chrono::Duration::milliseconds(config.default_throttle_window_ms as i64),
        clock.clone(),
    ));
    let event_bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
    let partition_storage = flowline::partition_storage::InMemoryPartitionStorage::new();
    let compaction = CompactionEngine::new(store, partition_storage, cache, event_bus, config, clock);

    let dataset_id = DatasetId(args.dataset_id);
    let manifest_id = ManifestId(args.manifest_id);

    let checkpoint = compaction.plan_or_resume(dataset_id, manifest_id).await?;
    print_info(&format!("compacting manifest {}", manifest_id.0));

    loop {
        let done = compaction.run_chunk(&checkpoint).await?;
        let guard = checkpoint.lock().await;
        print_info(&format!(
            "chunk complete: {}/{} groups",
            guard.completed_group_ids.len(),
            guard.groups.len()
        ));
        drop(guard);
        if done {
            break;
        }
    }

    print_success(&format!("compaction of manifest {} complete", manifest_id.0));
    Ok(())
}

async fn retain(args: RetainArgs) -> Result<()> {
    let config = Runtime::default();
    let clock = system_clock();
    let store: Arc<dyn flowline::manifest_store::ManifestStore> = Arc::new(
        PostgresManifestStore::new(&args.postgres_url)
            .await
            .context("connecting to the Postgres manifest store")?,
    );
    let cache = Arc::new(ManifestCache::new(
        chrono::Duration::milliseconds(config.default_throttle_window_ms as i64),
        clock.clone(),
    ));
    let event_bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
    let retention = RetentionEngine::new(store, cache, event_bus, clock);

    let manifest_id = ManifestId(args.manifest_id);
    let policy = RetentionPolicy {
        max_age_ms: args.max_age_hours.map(|h| h * 3_600_000),
        max_total_bytes: args.max_total_bytes,
    };

    let expired = retention.evaluate(manifest_id, &policy).await?;
    print_success(&format!("expired {expired} partition(s) from manifest {}", manifest_id.0));
    Ok(())
}
