//! Loading operator-authored workflow definitions from JSON files.
//!
//! Submitted definitions omit the fields the engine assigns itself
//! (`id`, `dag`, `createdAt`, `updatedAt`); [`load_definition`] fills
//! those in before handing the definition to `Flowline::create_workflow`,
//! which runs the real DAG validation.

use anyhow::{Context, Result};
use flowline::ids::WorkflowDefinitionId;
use flowline::model::{DagMetadata, WorkflowDefinition, WorkflowStep};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

/// The shape an operator writes by hand: everything in
/// [`WorkflowDefinition`] except the fields the engine computes.
#[derive(Debug, Deserialize)]
pub struct WorkflowDefinitionInput {
    pub slug: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default)]
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub parameters_schema: Value,
    #[serde(default)]
    pub default_parameters: Value,
    #[serde(default)]
    pub output_schema: Value,
    #[serde(default)]
    pub metadata: Value,
}

fn default_version() -> i64 {
    1
}

/// Read `path`, parse it as a [`WorkflowDefinitionInput`], and complete it
/// into a [`WorkflowDefinition`] ready for `Flowline::create_workflow`
/// (which still performs DAG validation and normalization).
pub fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading workflow definition file '{}'", path.display()))?;
    let input: WorkflowDefinitionInput = serde_json::from_str(&raw)
        .with_context(|| format!("parsing workflow definition file '{}'", path.display()))?;
    let now = chrono::Utc::now();
    Ok(WorkflowDefinition {
        id: WorkflowDefinitionId::new(),
        slug: input.slug,
        name: input.name,
        version: input.version,
        description: input.description,
        steps: input.steps,
        parameters_schema: input.parameters_schema,
        default_parameters: input.default_parameters,
        output_schema: input.output_schema,
        metadata: input.metadata,
        dag: DagMetadata::default(),
        created_at: now,
        updated_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_definition_fills_in_engine_assigned_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.json");
        std::fs::write(
            &path,
            r#"{
                "slug": "clicks-hourly",
                "name": "Clicks Hourly",
                "steps": [
                    {"id": "a", "kind": {"type": "job", "bundle": {"strategy": "latest", "slug": "j"}}}
                ]
            }"#,
        )
        .unwrap();

        let definition = load_definition(&path).unwrap();
        assert_eq!(definition.slug, "clicks-hourly");
        assert_eq!(definition.version, 1);
        assert_eq!(definition.steps.len(), 1);
        assert!(definition.dag.topological_order.is_empty());
    }

    #[test]
    fn load_definition_rejects_missing_file() {
        let result = load_definition(Path::new("/nonexistent/workflow.json"));
        assert!(result.is_err());
    }
}
