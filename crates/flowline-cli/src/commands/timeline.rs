//! Show the merged run activity feed for a workflow.
//!
//! Run state is in-process only, so this command registers the
//! definition, creates `--runs` runs against it, and then prints the
//! resulting timeline — there's no cross-invocation history to query.

use crate::helpers::load_definition;
use crate::output::{create_table, format_timestamp, OutputFormat};
use anyhow::{Context, Result};
use clap::Args;
use flowline::clock::system_clock;
use flowline::config::Runtime;
use flowline::executor::{CreateRunOutcome, NewRunRequest, NoopStepRunner};
use flowline::timeline::TimelineQuery;
use flowline::Flowline;
use std::path::PathBuf;

#[derive(Args)]
pub struct TimelineArgs {
    /// Path to a workflow definition JSON file
    definition: PathBuf,

    /// Number of runs to create before printing the timeline
    #[arg(long, default_value_t = 1)]
    runs: u32,

    /// Range preset (1h, 3h, 6h, 12h, 24h, 3d, 7d)
    #[arg(long)]
    range: Option<String>,

    /// Max entries returned (capped at 500)
    #[arg(long)]
    limit: Option<usize>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

pub async fn run(args: TimelineArgs) -> Result<()> {
    let definition = load_definition(&args.definition)?;
    let slug = definition.slug.clone();

    let flowline = Flowline::in_memory(Runtime::default(), system_clock());
    flowline
        .create_workflow(definition)
        .with_context(|| format!("registering workflow '{slug}'"))?;

    for i in 0..args.runs {
        let outcome = flowline
            .run_workflow(
                &slug,
                NewRunRequest {
                    run_key: Some(format!("timeline-demo-{i}")),
                    ..Default::default()
                },
            )
            .await?;
        let run = match outcome {
            CreateRunOutcome::Created(run) => run,
            CreateRunOutcome::Conflict(run) => run,
        };
        flowline
            .executor
            .drive_to_completion(&flowline.get_workflow(&slug)?, run.id, &NoopStepRunner)
            .await?;
    }

    let query = TimelineQuery {
        range: args.range,
        limit: args.limit,
        ..Default::default()
    };
    let entries = flowline.get_timeline(&slug, query).await?;

    match args.format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!(entries
                .iter()
                .map(|e| serde_json::json!({
                    "id": e.id,
                    "timestamp": e.timestamp,
                    "kind": format!("{:?}", e.kind),
                    "status": e.status,
                    "detail": e.detail,
                }))
                .collect::<Vec<_>>()))?
        ),
        OutputFormat::Table => {
            let mut table = create_table();
            table.set_header(vec!["timestamp", "kind", "status", "id"]);
            for entry in &entries {
                table.add_row(vec![
                    format_timestamp(entry.timestamp),
                    format!("{:?}", entry.kind),
                    entry.status.clone(),
                    entry.id.clone(),
                ]);
            }
            println!("{table}");
        }
    }

    Ok(())
}
