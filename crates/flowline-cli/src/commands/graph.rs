//! Print the asset graph derived from one or more workflow definitions.

use crate::helpers::load_definition;
use crate::output::{create_table, OutputFormat};
use anyhow::{Context, Result};
use clap::Args;
use flowline::clock::system_clock;
use flowline::config::Runtime;
use flowline::Flowline;
use std::path::PathBuf;

#[derive(Args)]
pub struct GraphArgs {
    /// Paths to workflow definition JSON files
    #[arg(required = true)]
    definitions: Vec<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

pub async fn run(args: GraphArgs) -> Result<()> {
    let flowline = Flowline::in_memory(Runtime::default(), system_clock());

    for path in &args.definitions {
        let definition = load_definition(path)?;
        flowline
            .create_workflow(definition)
            .with_context(|| format!("registering workflow from '{}'", path.display()))?;
    }

    let graph = flowline.get_graph();

    match args.format {
        OutputFormat::Json => {
            let edges: Vec<_> = graph
                .edges
                .iter()
                .map(|e| {
                    serde_json::json!({
                        "fromAsset": e.from_asset,
                        "viaWorkflow": e.via_workflow.0,
                        "viaStep": e.via_step,
                        "toAsset": e.to_asset,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&edges)?);
        }
        OutputFormat::Table => {
            let mut table = create_table();
            table.set_header(vec!["from asset", "via step", "to asset"]);
            for edge in &graph.edges {
                table.add_row(vec![edge.from_asset.clone(), edge.via_step.clone(), edge.to_asset.clone()]);
            }
            println!("{table}");
            if graph.edges.is_empty() {
                println!("no asset-to-asset edges declared across the given definitions");
            }
        }
    }

    Ok(())
}
