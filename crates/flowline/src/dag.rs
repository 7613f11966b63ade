//! Workflow model normalization and DAG validation (C5).
//!
//! Given a workflow definition's raw steps, this module builds the
//! adjacency list, detects cycles and dangling dependencies, computes a
//! stable topological order, and writes the resulting [`DagMetadata`] back
//! onto the definition. It also carries the step-shape normalization rules
//! that run ahead of validation (bundle entry-point parsing, `dependsOn`
//! dedup, asset id trimming).

use crate::error::FlowError;
use crate::model::workflow::{BundleStrategy, StepKind, WorkflowDefinition, WorkflowStep};
use crate::model::DagMetadata;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};

/// Normalize every step's shape, then validate the DAG and attach
/// `{topologicalOrder, adjacency, roots}` to `definition.dag`.
///
/// Mutates `definition` in place on success.
pub fn validate_and_normalize(definition: &mut WorkflowDefinition) -> Result<(), FlowError> {
    for step in &mut definition.steps {
        normalize_step(step);
        step.validate_shape()
            .map_err(|reason| FlowError::dag_invalid(reason, json!({"stepId": step.id})))?;
    }

    let ids: HashSet<&str> = definition.steps.iter().map(|s| s.id.as_str()).collect();
    check_fanout_id_collisions(&definition.steps, &ids)?;
    check_store_result_as_reuse(&definition.steps)?;

    let adjacency = build_adjacency(&definition.steps, &ids)?;
    let order = topological_order(&definition.steps, &adjacency)?;

    let roots = definition
        .steps
        .iter()
        .filter(|s| s.depends_on.is_empty())
        .map(|s| s.id.clone())
        .collect();

    definition.dag = DagMetadata {
        topological_order: order,
        adjacency,
        roots,
    };
    Ok(())
}

/// Dedup `dependsOn`, trim asset ids case-insensitively (by lowercasing a
/// copy for comparison while preserving original casing for display is not
/// required here — we trim and lowercase for stable matching), and infer a
/// job bundle's `{slug, version, exportName}` from `entryPoint` when no
/// explicit strategy was given.
fn normalize_step(step: &mut WorkflowStep) {
    let mut seen = HashSet::new();
    step.depends_on.retain(|dep| seen.insert(dep.clone()));

    for asset in &mut step.produces {
        asset.asset_id = asset.asset_id.trim().to_string();
    }

    if let StepKind::Job { bundle } = &mut step.kind {
        normalize_bundle(bundle);
    }
    if let StepKind::Fanout { fanout } = &mut step.kind {
        if let StepKind::Job { bundle } = fanout.template.as_mut() {
            normalize_bundle(bundle);
        }
    }
}

/// Parse a raw `entryPoint` of the form `module:export@version` (any of
/// `export`/`version` optional) into `{slug, version, exportName}` when the
/// bundle arrived without an explicit strategy.
fn normalize_bundle(bundle: &mut crate::model::BundleRef) {
    if bundle.strategy.is_some() {
        return;
    }
    let Some(entry_point) = bundle.entry_point.clone() else {
        return;
    };

    let (module_and_export, version) = match entry_point.split_once('@') {
        Some((head, v)) => (head.to_string(), Some(v.to_string())),
        None => (entry_point, None),
    };
    let (module, export) = match module_and_export.split_once(':') {
        Some((m, e)) => (m.to_string(), Some(e.to_string())),
        None => (module_and_export, None),
    };

    bundle.slug = module;
    bundle.export_name = export;
    bundle.version = version.clone();
    bundle.strategy = Some(if version.is_some() {
        BundleStrategy::Pinned
    } else {
        BundleStrategy::Latest
    });
}

fn check_fanout_id_collisions(
    steps: &[WorkflowStep],
    ids: &HashSet<&str>,
) -> Result<(), FlowError> {
    for step in steps {
        if let StepKind::Fanout { fanout } = &step.kind {
            if ids.contains(fanout.template_id.as_str()) {
                return Err(FlowError::dag_invalid(
                    "fan-out template id collides with an existing step id",
                    json!({"stepId": step.id, "templateId": fanout.template_id}),
                ));
            }
        }
    }
    Ok(())
}

fn check_store_result_as_reuse(steps: &[WorkflowStep]) -> Result<(), FlowError> {
    let mut seen = HashMap::new();
    for step in steps {
        if let Some(key) = &step.store_result_as {
            if let Some(prior) = seen.insert(key.clone(), step.id.clone()) {
                return Err(FlowError::dag_invalid(
                    "storeResultAs key is reused across steps",
                    json!({"key": key, "firstStepId": prior, "secondStepId": step.id}),
                ));
            }
        }
    }
    Ok(())
}

fn build_adjacency(
    steps: &[WorkflowStep],
    ids: &HashSet<&str>,
) -> Result<HashMap<String, Vec<String>>, FlowError> {
    let mut adjacency: HashMap<String, Vec<String>> =
        steps.iter().map(|s| (s.id.clone(), Vec::new())).collect();

    for step in steps {
        for dep in &step.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(FlowError::dag_invalid(
                    "dependsOn references an unknown step id",
                    json!({"stepId": step.id, "unknownDependency": dep}),
                ));
            }
            adjacency
                .get_mut(dep)
                .expect("dep validated above")
                .push(step.id.clone());
        }
    }
    Ok(adjacency)
}

/// Kahn's algorithm, processing ties in declaration order so the result is
/// deterministic and stable across re-validation of the same definition.
fn topological_order(
    steps: &[WorkflowStep],
    adjacency: &HashMap<String, Vec<String>>,
) -> Result<Vec<String>, FlowError> {
    let declaration_index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut in_degree: HashMap<String, usize> =
        steps.iter().map(|s| (s.id.clone(), s.depends_on.len())).collect();

    let mut ready: VecDeque<String> = steps
        .iter()
        .filter(|s| s.depends_on.is_empty())
        .map(|s| s.id.clone())
        .collect();
    sort_by_declaration(&mut ready, &declaration_index);

    let mut order = Vec::with_capacity(steps.len());
    while let Some(next) = pop_next(&mut ready, &declaration_index) {
        order.push(next.clone());
        if let Some(children) = adjacency.get(&next) {
            let mut newly_ready = Vec::new();
            for child in children {
                let degree = in_degree.get_mut(child).expect("child in in_degree");
                *degree -= 1;
                if *degree == 0 {
                    newly_ready.push(child.clone());
                }
            }
            ready.extend(newly_ready);
        }
    }

    if order.len() != steps.len() {
        let cyclic: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree > 0)
            .map(|(id, _)| id.as_str())
            .collect();
        return Err(FlowError::dag_invalid(
            "workflow contains a dependency cycle",
            json!({"stepsInCycle": cyclic}),
        ));
    }
    Ok(order)
}

fn sort_by_declaration(queue: &mut VecDeque<String>, index: &HashMap<&str, usize>) {
    let mut items: Vec<String> = queue.drain(..).collect();
    items.sort_by_key(|id| index[id.as_str()]);
    queue.extend(items);
}

fn pop_next(queue: &mut VecDeque<String>, index: &HashMap<&str, usize>) -> Option<String> {
    sort_by_declaration(queue, index);
    queue.pop_front()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BundleRef, RetryPolicy, WorkflowDefinitionId};
    use chrono::Utc;

    fn job_step(id: &str, depends_on: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            retry_policy: RetryPolicy::default(),
            kind: StepKind::Job {
                bundle: BundleRef {
                    strategy: None,
                    slug: String::new(),
                    version: None,
                    export_name: None,
                    entry_point: Some("job-module:run@1.2.0".to_string()),
                },
            },
            store_result_as: None,
            produces: Vec::new(),
        }
    }

    fn fanout_step(id: &str, template_id: &str) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            depends_on: Vec::new(),
            retry_policy: RetryPolicy::default(),
            kind: StepKind::Fanout {
                fanout: crate::model::FanOutSpec {
                    collection: "{{items | json_encode}}".to_string(),
                    max_items: 10,
                    max_concurrency: 1,
                    store_results_as: "results".to_string(),
                    template_id: template_id.to_string(),
                    template: Box::new(StepKind::Job {
                        bundle: BundleRef {
                            strategy: None,
                            slug: "noop".into(),
                            version: None,
                            export_name: None,
                            entry_point: None,
                        },
                    }),
                },
            },
            store_result_as: None,
            produces: Vec::new(),
        }
    }

    fn definition(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        let now = Utc::now();
        WorkflowDefinition {
            id: WorkflowDefinitionId::new(),
            slug: "w1".into(),
            name: "w1".into(),
            version: 1,
            description: None,
            steps,
            parameters_schema: serde_json::Value::Null,
            default_parameters: serde_json::Value::Null,
            output_schema: serde_json::Value::Null,
            metadata: serde_json::Value::Null,
            dag: Default::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn linear_chain_orders_by_dependency() {
        let mut def = definition(vec![job_step("a", &[]), job_step("b", &["a"])]);
        validate_and_normalize(&mut def).unwrap();
        assert_eq!(def.dag.topological_order, vec!["a", "b"]);
        assert_eq!(def.dag.roots, vec!["a"]);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut def = definition(vec![job_step("a", &["b"]), job_step("b", &["a"])]);
        let err = validate_and_normalize(&mut def).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::DagInvalid);
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let mut def = definition(vec![job_step("a", &["missing"])]);
        let err = validate_and_normalize(&mut def).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::DagInvalid);
    }

    #[test]
    fn duplicate_depends_on_is_deduped() {
        let mut def = definition(vec![
            job_step("a", &[]),
            {
                let mut b = job_step("b", &["a"]);
                b.depends_on.push("a".to_string());
                b
            },
        ]);
        validate_and_normalize(&mut def).unwrap();
        assert_eq!(def.steps[1].depends_on, vec!["a"]);
    }

    #[test]
    fn entry_point_is_parsed_into_bundle_fields() {
        let mut def = definition(vec![job_step("a", &[])]);
        validate_and_normalize(&mut def).unwrap();
        let StepKind::Job { bundle } = &def.steps[0].kind else {
            panic!("expected job step");
        };
        assert_eq!(bundle.slug, "job-module");
        assert_eq!(bundle.export_name.as_deref(), Some("run"));
        assert_eq!(bundle.version.as_deref(), Some("1.2.0"));
        assert_eq!(bundle.strategy, Some(BundleStrategy::Pinned));
    }

    #[test]
    fn reused_store_result_as_key_is_rejected() {
        let mut a = job_step("a", &[]);
        a.store_result_as = Some("shared".to_string());
        let mut b = job_step("b", &["a"]);
        b.store_result_as = Some("shared".to_string());
        let mut def = definition(vec![a, b]);
        let err = validate_and_normalize(&mut def).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::DagInvalid);
    }

    #[test]
    fn fanout_template_id_colliding_with_a_step_id_is_rejected() {
        let mut def = definition(vec![job_step("a", &[]), fanout_step("b", "a")]);
        let err = validate_and_normalize(&mut def).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::DagInvalid);
    }

    #[test]
    fn fanout_template_id_distinct_from_step_ids_is_accepted() {
        let mut def = definition(vec![job_step("a", &[]), fanout_step("b", "b-child")]);
        validate_and_normalize(&mut def).unwrap();
        assert_eq!(def.dag.topological_order, vec!["a", "b"]);
    }

    #[test]
    fn ties_break_by_declaration_order() {
        let mut def = definition(vec![job_step("b", &[]), job_step("a", &[])]);
        validate_and_normalize(&mut def).unwrap();
        assert_eq!(def.dag.topological_order, vec!["b", "a"]);
    }
}
