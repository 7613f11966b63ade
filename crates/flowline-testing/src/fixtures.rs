//! Builders for the domain entities integration tests construct most
//! often: workflow definitions, steps, datasets, manifests, and
//! partitions. Each builder fills in an id and timestamps so a test only
//! has to specify what the scenario actually varies.

use chrono::{DateTime, Utc};
use flowline::ids::{DatasetId, SchemaVersionId, StorageTargetId, WorkflowDefinitionId};
use flowline::manifest_store::{NewManifest, NewPartition};
use flowline::model::{
    BundleRef, BundleStrategy, DagMetadata, Dataset, DatasetStatus, RetryPolicy, StepKind,
    WorkflowDefinition, WorkflowStep, WriteFormat,
};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single job-step workflow definition, unvalidated. Run it through
/// [`flowline::Flowline::create_workflow`] to get `dag` populated.
pub fn single_step_workflow(slug: &str) -> WorkflowDefinition {
    workflow_with_steps(slug, vec![job_step("step")])
}

/// A workflow definition over the given steps, unvalidated.
pub fn workflow_with_steps(slug: &str, steps: Vec<WorkflowStep>) -> WorkflowDefinition {
    let now = Utc::now();
    WorkflowDefinition {
        id: WorkflowDefinitionId::new(),
        slug: slug.to_string(),
        name: slug.to_string(),
        version: 1,
        description: None,
        steps,
        parameters_schema: Value::Null,
        default_parameters: Value::Null,
        output_schema: Value::Null,
        metadata: Value::Null,
        dag: DagMetadata::default(),
        created_at: now,
        updated_at: now,
    }
}

/// A root job step bound to a bundle slug matching `id`.
pub fn job_step(id: &str) -> WorkflowStep {
    job_step_depending_on(id, vec![])
}

/// A job step depending on the given step ids.
pub fn job_step_depending_on(id: &str, depends_on: Vec<String>) -> WorkflowStep {
    WorkflowStep {
        id: id.to_string(),
        depends_on,
        retry_policy: RetryPolicy::default(),
        kind: StepKind::Job {
            bundle: BundleRef {
                strategy: Some(BundleStrategy::Latest),
                slug: id.to_string(),
                version: None,
                export_name: None,
                entry_point: None,
            },
        },
        store_result_as: None,
        produces: vec![],
    }
}

/// An active, duckdb-format dataset with no default storage target.
pub fn dataset(slug: &str) -> Dataset {
    let now = Utc::now();
    Dataset {
        id: DatasetId::new(),
        slug: slug.to_string(),
        name: slug.to_string(),
        status: DatasetStatus::Active,
        write_format: WriteFormat::Duckdb,
        default_storage_target_id: None,
        metadata: Value::Null,
        created_at: now,
        updated_at: now,
    }
}

/// A published manifest covering `partition_count` contiguous one-hour
/// partitions starting at `start`, suitable for
/// [`flowline::manifest_store::ManifestStore::create_dataset_manifest`].
pub fn new_manifest(
    dataset_id: DatasetId,
    schema_version_id: SchemaVersionId,
    storage_target_id: StorageTargetId,
    start: DateTime<Utc>,
    partition_count: usize,
) -> NewManifest {
    let partitions = (0..partition_count)
        .map(|i| {
            new_partition(
                storage_target_id,
                start + chrono::Duration::hours(i as i64),
                start + chrono::Duration::hours(i as i64 + 1),
            )
        })
        .collect();
    NewManifest {
        dataset_id,
        version: 1,
        schema_version_id,
        parent_manifest_id: None,
        manifest_shard: "default".to_string(),
        summary: Value::Null,
        metadata: Value::Null,
        published: true,
        partitions,
    }
}

/// A 1000-row, 1 MiB duckdb partition covering `[start, end)`.
pub fn new_partition(storage_target_id: StorageTargetId, start: DateTime<Utc>, end: DateTime<Utc>) -> NewPartition {
    NewPartition {
        partition_key: BTreeMap::new(),
        storage_target_id,
        file_format: "duckdb".to_string(),
        file_path: format!("part-{}.duckdb", uuid::Uuid::new_v4()),
        file_size_bytes: Some(1024 * 1024),
        row_count: Some(1_000),
        start_time: start,
        end_time: end,
        checksum: None,
        table_name: "data".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_step_workflow_has_one_unvalidated_step() {
        let def = single_step_workflow("demo");
        assert_eq!(def.steps.len(), 1);
        assert!(def.dag.topological_order.is_empty());
    }

    #[test]
    fn job_step_depending_on_carries_its_dependencies() {
        let step = job_step_depending_on("b", vec!["a".to_string()]);
        assert_eq!(step.depends_on, vec!["a".to_string()]);
    }

    #[test]
    fn new_manifest_builds_contiguous_hourly_partitions() {
        let start = Utc::now();
        let manifest = new_manifest(DatasetId::new(), SchemaVersionId::new(), StorageTargetId::new(), start, 3);
        assert_eq!(manifest.partitions.len(), 3);
        assert_eq!(manifest.partitions[0].end_time, manifest.partitions[1].start_time);
        assert!(manifest.published);
    }
}
