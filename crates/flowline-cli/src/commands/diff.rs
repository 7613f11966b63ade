//! Run a workflow twice, with independent parameter sets, and diff the
//! resulting runs' parameters, context, output, and produced assets.

use crate::helpers::load_definition;
use anyhow::{Context, Result};
use clap::Args;
use flowline::clock::system_clock;
use flowline::config::Runtime;
use flowline::executor::{CreateRunOutcome, NewRunRequest, NoopStepRunner};
use flowline::Flowline;
use std::path::PathBuf;

#[derive(Args)]
pub struct DiffArgs {
    /// Path to a workflow definition JSON file
    definition: PathBuf,

    /// Parameters for the first (base) run, as a JSON object
    #[arg(long)]
    base_parameters: Option<String>,

    /// Parameters for the second (compare) run, as a JSON object
    #[arg(long)]
    compare_parameters: Option<String>,
}

async fn run_once(flowline: &Flowline, slug: &str, parameters: Option<String>) -> Result<flowline::ids::WorkflowRunId> {
    let parameters = parameters
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("parsing parameters as JSON")?;

    let run = match flowline
        .run_workflow(
            slug,
            NewRunRequest {
                parameters,
                ..Default::default()
            },
        )
        .await?
    {
        CreateRunOutcome::Created(run) => run,
        CreateRunOutcome::Conflict(run) => run,
    };
    flowline
        .executor
        .drive_to_completion(&flowline.get_workflow(slug)?, run.id, &NoopStepRunner)
        .await?;
    Ok(run.id)
}

pub async fn run(args: DiffArgs) -> Result<()> {
    let definition = load_definition(&args.definition)?;
    let slug = definition.slug.clone();

    let flowline = Flowline::in_memory(Runtime::default(), system_clock());
    flowline
        .create_workflow(definition)
        .with_context(|| format!("registering workflow '{slug}'"))?;

    let base_id = run_once(&flowline, &slug, args.base_parameters).await?;
    let compare_id = run_once(&flowline, &slug, args.compare_parameters).await?;

    let diff = flowline.diff_runs(base_id, compare_id).await?;
    println!("{}", serde_json::to_string_pretty(&diff)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: DiffArgs,
    }

    #[test]
    fn parses_both_parameter_sets() {
        let w = Wrapper::try_parse_from([
            "flowline",
            "workflow.json",
            "--base-parameters",
            "{}",
            "--compare-parameters",
            "{\"a\":1}",
        ])
        .unwrap();
        assert_eq!(w.args.base_parameters.as_deref(), Some("{}"));
        assert_eq!(w.args.compare_parameters.as_deref(), Some("{\"a\":1}"));
    }
}
