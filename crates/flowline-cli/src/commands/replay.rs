//! Run a workflow once, then replay it, printing both outcomes.
//!
//! Like `run`, this is self-contained: since run state is in-process
//! only, there is no prior run from an earlier invocation to replay
//! against, so this command creates the source run itself before
//! replaying it.

use crate::helpers::load_definition;
use crate::output::print_info;
use anyhow::{Context, Result};
use clap::Args;
use flowline::clock::system_clock;
use flowline::config::Runtime;
use flowline::executor::{CreateRunOutcome, NewRunRequest, NoopStepRunner};
use flowline::Flowline;
use std::path::PathBuf;

#[derive(Args)]
pub struct ReplayArgs {
    /// Path to a workflow definition JSON file
    definition: PathBuf,

    /// Run parameters for the source run, as a JSON object
    #[arg(long)]
    parameters: Option<String>,

    /// Asset ids known to be stale; without `--allow-stale` these block the replay
    #[arg(long = "stale-asset")]
    stale_assets: Vec<String>,

    /// Replay even though `--stale-asset` entries were given
    #[arg(long)]
    allow_stale: bool,
}

pub async fn run(args: ReplayArgs) -> Result<()> {
    let definition = load_definition(&args.definition)?;
    let slug = definition.slug.clone();

    let flowline = Flowline::in_memory(Runtime::default(), system_clock());
    flowline
        .create_workflow(definition)
        .with_context(|| format!("registering workflow '{slug}'"))?;

    let parameters = args
        .parameters
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("parsing --parameters as JSON")?;

    let source = match flowline
        .run_workflow(
            &slug,
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
        .drive_to_completion(&flowline.get_workflow(&slug)?, source.id, &NoopStepRunner)
        .await?;
    print_info(&format!("source run {} completed", source.id.0));

    let outcome = flowline
        .replay_run(&slug, source.id, args.allow_stale, args.stale_assets)
        .await?;

    let replayed = match outcome {
        CreateRunOutcome::Created(run) => run,
        CreateRunOutcome::Conflict(run) => run,
    };
    print_info(&format!("replay run {} created", replayed.id.0));

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "sourceRun": flowline.executor.get_run(source.id).await?,
            "replayRun": replayed,
        }))?
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        args: ReplayArgs,
    }

    #[test]
    fn parses_repeated_stale_asset_flags() {
        let w = Wrapper::try_parse_from([
            "flowline",
            "workflow.json",
            "--stale-asset",
            "raw",
            "--stale-asset",
            "curated",
            "--allow-stale",
        ])
        .unwrap();
        assert_eq!(w.args.stale_assets, vec!["raw", "curated"]);
        assert!(w.args.allow_stale);
    }
}
