#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod helpers;
mod output;

use commands::{diff, graph, lifecycle, replay, run, status, timeline};

/// Flowline CLI - operator tooling for workflow orchestration and dataset
/// lifecycle maintenance.
///
/// **Workflow operations** (self-contained, in-memory):
///   run, replay, diff, timeline, graph
///
/// **Dataset lifecycle** (requires `--postgres-url`):
///   lifecycle compact, lifecycle retain
///
/// **Infrastructure health**:
///   status
#[derive(Parser)]
#[command(name = "flowline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator CLI for workflow orchestration and dataset lifecycle", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a workflow definition and start a run against it
    Run(run::RunArgs),

    /// Run a workflow, then replay it
    Replay(replay::ReplayArgs),

    /// Run a workflow twice and diff the resulting runs
    Diff(diff::DiffArgs),

    /// Show the merged run activity feed for a workflow
    Timeline(timeline::TimelineArgs),

    /// Show the asset graph derived from workflow definitions
    Graph(graph::GraphArgs),

    /// Dataset lifecycle jobs (compaction, retention)
    Lifecycle(lifecycle::LifecycleArgs),

    /// Check manifest store connectivity
    Status(status::StatusArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => run::run(args).await,
        Commands::Replay(args) => replay::run(args).await,
        Commands::Diff(args) => diff::run(args).await,
        Commands::Timeline(args) => timeline::run(args).await,
        Commands::Graph(args) => graph::run(args).await,
        Commands::Lifecycle(args) => lifecycle::run(args).await,
        Commands::Status(args) => status::run(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_parses_known_subcommands() {
        let cli = Cli::try_parse_from(["flowline", "status", "--postgres-url", "postgres://x"])
            .expect("parse status");
        assert!(matches!(cli.command, Commands::Status(_)));

        let cli = Cli::try_parse_from(["flowline", "run", "workflow.json"]).expect("parse run");
        assert!(matches!(cli.command, Commands::Run(_)));
    }

    #[test]
    fn clap_enforces_required_args() {
        assert!(Cli::try_parse_from(["flowline", "status"]).is_err());
        assert!(Cli::try_parse_from(["flowline", "run"]).is_err());
    }
}
