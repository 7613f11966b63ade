//! Register a workflow definition and start a run against it.
//!
//! Run state lives only in the process that created it (the reference
//! executor keeps no durable run store), so this command registers the
//! definition, creates the run, and — unless `--no-drive` is given —
//! drives it to completion with the no-op step runner, all within one
//! invocation.

use crate::helpers::load_definition;
use crate::output::{create_table, format_timestamp, print_error, print_info, print_success, OutputFormat};
use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use flowline::clock::system_clock;
use flowline::config::Runtime;
use flowline::executor::{CreateRunOutcome, NewRunRequest, NoopStepRunner};
use flowline::Flowline;
use std::path::PathBuf;

#[derive(Args)]
pub struct RunArgs {
    /// Path to a workflow definition JSON file
    definition: PathBuf,

    /// Run parameters as a JSON object, overriding the definition's defaults
    #[arg(long)]
    parameters: Option<String>,

    /// Dedup key: a second run with the same key while the first is active
    /// returns the active run instead of creating a new one
    #[arg(long)]
    run_key: Option<String>,

    /// Partition key, required for workflows with partitioned assets
    #[arg(long)]
    partition_key: Option<String>,

    /// Identity recorded as the run's trigger source
    #[arg(long, default_value = "cli")]
    triggered_by: String,

    /// Register and create the run but don't drive it to completion
    #[arg(long)]
    no_drive: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

pub async fn run(args: RunArgs) -> Result<()> {
    let definition = load_definition(&args.definition)?;
    let slug = definition.slug.clone();

    let flowline = Flowline::in_memory(Runtime::default(), system_clock());
    flowline
        .create_workflow(definition)
        .with_context(|| format!("registering workflow '{slug}'"))?;

    print_info(&format!("registered workflow '{slug}'"));

    let parameters = args
        .parameters
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("parsing --parameters as JSON")?;

    let request = NewRunRequest {
        parameters,
        run_key: args.run_key,
        partition_key: args.partition_key,
        triggered_by: Some(args.triggered_by),
        trigger: serde_json::json!({"source": "cli"}),
    };

    let outcome = flowline.run_workflow(&slug, request).await?;

    let (run, created) = match outcome {
        CreateRunOutcome::Created(run) => (run, true),
        CreateRunOutcome::Conflict(run) => (run, false),
    };

    if created {
        print_success(&format!("created run {}", run.id.0));
    } else {
        print_info(&format!("run key already active; returning run {}", run.id.0));
    }

    let assets = if created && !args.no_drive {
        flowline
            .executor
            .drive_to_completion(&flowline.get_workflow(&slug)?, run.id, &NoopStepRunner)
            .await?
    } else {
        Vec::new()
    };

    let final_run = flowline.executor.get_run(run.id).await?;

    match args.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "run": final_run,
                    "producedAssets": assets,
                }))?
            );
        }
        OutputFormat::Table => {
            let mut table = create_table();
            table.set_header(vec!["field", "value"]);
            table.add_row(vec!["run id".to_string(), final_run.id.0.to_string()]);
            table.add_row(vec!["status".to_string(), format!("{:?}", final_run.status)]);
            table.add_row(vec![
                "created at".to_string(),
                format_timestamp(final_run.created_at),
            ]);
            if let Some(completed_at) = final_run.completed_at {
                table.add_row(vec!["completed at".to_string(), format_timestamp(completed_at)]);
            }
            println!("{table}");
            if !assets.is_empty() {
                println!("{}", format!("{} asset(s) produced", assets.len()).dimmed());
            }
        }
    }

    if final_run.status == flowline::model::RunStatus::Failed {
        print_error("run ended in a failed state");
    }

    Ok(())
}
