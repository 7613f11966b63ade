//! Infrastructure status check.
//!
//! The only external dependency a Flowline deployment has is its
//! manifest store; this checks that a PostgreSQL connection string
//! actually connects and that the store's schema initializes.

use crate::output::{create_table, print_error, print_success};
use anyhow::Result;
use clap::Args;
use colored::Colorize;
use flowline_postgres_store::PostgresManifestStore;
use std::time::Duration;

#[derive(Args)]
pub struct StatusArgs {
    /// PostgreSQL connection string for the manifest store
    #[arg(long)]
    postgres_url: String,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum HealthStatus {
    Healthy,
    Down,
}

impl HealthStatus {
    fn colored_icon(&self) -> String {
        match self {
            HealthStatus::Healthy => "✓".bright_green().bold().to_string(),
            HealthStatus::Down => "✗".bright_red().bold().to_string(),
        }
    }
}

pub async fn run(args: StatusArgs) -> Result<()> {
    let (status, detail) = match tokio::time::timeout(
        Duration::from_secs(args.timeout_secs),
        PostgresManifestStore::new(&args.postgres_url),
    )
    .await
    {
        Ok(Ok(_store)) => (HealthStatus::Healthy, "connected and schema initialized".to_string()),
        Ok(Err(e)) => (HealthStatus::Down, e.to_string()),
        Err(_) => (HealthStatus::Down, format!("timed out after {}s", args.timeout_secs)),
    };

    let mut table = create_table();
    table.set_header(vec!["service", "status", "detail"]);
    table.add_row(vec![
        "manifest store (postgres)".to_string(),
        status.colored_icon(),
        detail.clone(),
    ]);
    println!("{table}");

    match status {
        HealthStatus::Healthy => {
            print_success("manifest store is reachable");
            Ok(())
        }
        HealthStatus::Down => {
            print_error(&format!("manifest store is down: {detail}"));
            anyhow::bail!("manifest store is down")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: StatusArgs,
    }

    #[test]
    fn requires_postgres_url() {
        assert!(Wrapper::try_parse_from(["flowline"]).is_err());
    }

    #[test]
    fn defaults_timeout_to_five_seconds() {
        let w = Wrapper::try_parse_from(["flowline", "--postgres-url", "postgres://x"]).unwrap();
        assert_eq!(w.args.timeout_secs, 5);
    }
}
