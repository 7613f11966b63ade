//! Per-trigger delivery pipeline (§4.7): match, template validation,
//! dedupe, throttle, concurrency gating, launch, and the trigger
//! auto-pause failure counter.

use crate::clock::SharedClock;
use crate::concurrency::KeyedLock;
use crate::error::FlowResult;
use crate::event_bus::EventBus;
use crate::executor::{CreateRunOutcome, Executor, NewRunRequest};
use crate::ids::TriggerId;
use crate::model::{DeliveryStatus, EventEnvelope, EventTrigger, TriggerDelivery, WorkflowDefinition};
use crate::template;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// How many deliveries to retain per trigger for dedupe/throttle lookups
/// and timeline display. Oldest entries are evicted once this is exceeded.
const HISTORY_CAP: usize = 500;

pub struct DeliveryEngine {
    history: DashMap<TriggerId, RwLock<Vec<TriggerDelivery>>>,
    locks: KeyedLock<TriggerId>,
    clock: SharedClock,
    event_bus: Arc<dyn EventBus>,
}

impl DeliveryEngine {
    pub fn new(clock: SharedClock, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            history: DashMap::new(),
            locks: KeyedLock::new(),
            clock,
            event_bus,
        }
    }

    pub async fn deliveries_for(&self, trigger_id: TriggerId) -> Vec<TriggerDelivery> {
        match self.history.get(&trigger_id) {
            Some(shard) => shard.read().await.clone(),
            None => Vec::new(),
        }
    }

    /// Run `event` through `trigger`'s delivery pipeline. Returns `Ok(None)`
    /// if the event doesn't match the trigger at all (no delivery is
    /// recorded for a non-match, per §4.7 step 1).
    pub async fn deliver(
        &self,
        trigger: &EventTrigger,
        workflow: &WorkflowDefinition,
        event: &EventEnvelope,
        executor: &Executor,
    ) -> FlowResult<Option<TriggerDelivery>> {
        if trigger.event_type != event.event_type {
            return Ok(None);
        }
        if let Some(filter) = &trigger.source_filter {
            if filter != &event.source {
                return Ok(None);
            }
        }
        if !super::predicate::matches_all(&trigger.predicates, &event.payload) {
            return Ok(None);
        }

        let _guard = self.locks.acquire(trigger.id).await;
        let now = self.clock.now();
        let context = event.as_json();

        let idempotency_rendered = match &trigger.idempotency_key_expression {
            Some(expr) => template::render(expr, &context),
            None => Ok(event.id.0.to_string()),
        };
        let idempotency_key = match idempotency_rendered {
            Ok(k) => k,
            Err(e) => {
                return Ok(Some(
                    self.record(trigger.id, self.failed_delivery(event, now, e.message))
                        .await,
                ));
            }
        };
        let dedupe_key = format!("{idempotency_key}:{}", trigger.id.0);

        let run_key_rendered = match &trigger.run_key_template {
            Some(tmpl) => match template::render(tmpl, &context) {
                Ok(k) => Some(k),
                Err(e) => {
                    return Ok(Some(
                        self.record(trigger.id, self.failed_delivery(event, now, e.message))
                            .await,
                    ));
                }
            },
            None => None,
        };

        let parameters = match template::render_json(&trigger.parameter_template, &context) {
            Ok(p) => p,
            Err(e) => {
                return Ok(Some(
                    self.record(trigger.id, self.failed_delivery(event, now, e.message))
                        .await,
                ));
            }
        };

        let history = self.deliveries_for(trigger.id).await;

        if let Some(existing) = history
            .iter()
            .find(|d| d.is_active() && d.dedupe_key.as_deref() == Some(dedupe_key.as_str()))
        {
            let delivery = TriggerDelivery {
                id: crate::ids::DeliveryId::new(),
                trigger_id: trigger.id,
                event_id: event.id,
                status: DeliveryStatus::Skipped,
                attempts: 0,
                dedupe_key: Some(dedupe_key),
                existing_delivery_id: Some(existing.id),
                throttled_until: None,
                next_attempt_at: None,
                workflow_run_id: None,
                error_message: None,
                created_at: now,
                updated_at: now,
            };
            return Ok(Some(self.record(trigger.id, delivery).await));
        }

        if let (Some(window_ms), Some(count_limit)) = (trigger.throttle_window_ms, trigger.throttle_count) {
            let window_start = now - chrono::Duration::milliseconds(window_ms as i64);
            let recent_launches = history
                .iter()
                .filter(|d| d.status == DeliveryStatus::Launched && d.created_at >= window_start)
                .count();
            if recent_launches as u32 >= count_limit {
                let delivery = TriggerDelivery {
                    id: crate::ids::DeliveryId::new(),
                    trigger_id: trigger.id,
                    event_id: event.id,
                    status: DeliveryStatus::Throttled,
                    attempts: 0,
                    dedupe_key: Some(dedupe_key),
                    existing_delivery_id: None,
                    throttled_until: Some(now + chrono::Duration::milliseconds(window_ms as i64)),
                    next_attempt_at: None,
                    workflow_run_id: None,
                    error_message: None,
                    created_at: now,
                    updated_at: now,
                };
                return Ok(Some(self.record(trigger.id, delivery).await));
            }
        }

        if let Some(limit) = trigger.max_concurrency {
            let mut active = 0u32;
            for d in history.iter().filter(|d| d.status == DeliveryStatus::Launched) {
                if let Some(run_id) = d.workflow_run_id {
                    if let Ok(run) = executor.get_run(run_id).await {
                        if run.status.is_active() {
                            active += 1;
                        }
                    }
                }
            }
            if active >= limit {
                let delivery = TriggerDelivery {
                    id: crate::ids::DeliveryId::new(),
                    trigger_id: trigger.id,
                    event_id: event.id,
                    status: DeliveryStatus::Matched,
                    attempts: 0,
                    dedupe_key: Some(dedupe_key),
                    existing_delivery_id: None,
                    throttled_until: None,
                    next_attempt_at: Some(now + chrono::Duration::seconds(5)),
                    workflow_run_id: None,
                    error_message: None,
                    created_at: now,
                    updated_at: now,
                };
                return Ok(Some(self.record(trigger.id, delivery).await));
            }
        }

        let outcome = executor
            .create_run(
                workflow,
                NewRunRequest {
                    parameters: Some(parameters),
                    run_key: run_key_rendered,
                    partition_key: None,
                    triggered_by: Some(format!("trigger:{}", trigger.id.0)),
                    trigger: context,
                },
            )
            .await;

        let delivery = match outcome {
            Ok(CreateRunOutcome::Created(run)) => TriggerDelivery {
                id: crate::ids::DeliveryId::new(),
                trigger_id: trigger.id,
                event_id: event.id,
                status: DeliveryStatus::Launched,
                attempts: 1,
                dedupe_key: Some(dedupe_key),
                existing_delivery_id: None,
                throttled_until: None,
                next_attempt_at: None,
                workflow_run_id: Some(run.id),
                error_message: None,
                created_at: now,
                updated_at: now,
            },
            Ok(CreateRunOutcome::Conflict(run)) => TriggerDelivery {
                id: crate::ids::DeliveryId::new(),
                trigger_id: trigger.id,
                event_id: event.id,
                status: DeliveryStatus::Skipped,
                attempts: 1,
                dedupe_key: Some(dedupe_key),
                existing_delivery_id: None,
                throttled_until: None,
                next_attempt_at: None,
                workflow_run_id: Some(run.id),
                error_message: Some("run-key conflict".to_string()),
                created_at: now,
                updated_at: now,
            },
            Err(e) => self.failed_delivery(event, now, e.message),
        };

        Ok(Some(self.record(trigger.id, delivery).await))
    }

    fn failed_delivery(&self, event: &EventEnvelope, now: DateTime<Utc>, error_message: String) -> TriggerDelivery {
        TriggerDelivery {
            id: crate::ids::DeliveryId::new(),
            trigger_id: TriggerId::default(),
            event_id: event.id,
            status: DeliveryStatus::Failed,
            attempts: 1,
            dedupe_key: None,
            existing_delivery_id: None,
            throttled_until: None,
            next_attempt_at: None,
            workflow_run_id: None,
            error_message: Some(error_message),
            created_at: now,
            updated_at: now,
        }
    }

    async fn record(&self, trigger_id: TriggerId, mut delivery: TriggerDelivery) -> TriggerDelivery {
        delivery.trigger_id = trigger_id;
        let shard = self.history.entry(trigger_id).or_insert_with(|| RwLock::new(Vec::new()));
        let mut rows = shard.write().await;
        rows.push(delivery.clone());
        if rows.len() > HISTORY_CAP {
            let overflow = rows.len() - HISTORY_CAP;
            rows.drain(0..overflow);
        }
        if delivery.status == DeliveryStatus::Launched {
            self.event_bus.publish(
                "trigger.delivery.launched",
                serde_json::json!({"triggerId": trigger_id.0, "deliveryId": delivery.id.0}),
            );
        }
        delivery
    }
}

/// Pure computation of a trigger's next `(consecutiveFailures, pausedAt,
/// pauseReason)` after observing `delivery`'s outcome, per the
/// auto-pause rule in §4.7. The caller persists the result onto the
/// trigger entity and emits `trigger_paused` when it newly transitions.
pub fn next_failure_state(
    trigger: &EventTrigger,
    delivery: &TriggerDelivery,
    now: DateTime<Utc>,
    threshold: u32,
    backoff: chrono::Duration,
) -> (u32, Option<DateTime<Utc>>, Option<String>) {
    match delivery.status {
        DeliveryStatus::Failed => {
            let consecutive = trigger.consecutive_failures + 1;
            if consecutive >= threshold {
                (
                    consecutive,
                    Some(now + backoff),
                    delivery.error_message.clone(),
                )
            } else {
                (consecutive, trigger.paused_at, trigger.pause_reason.clone())
            }
        }
        DeliveryStatus::Launched => (0, None, None),
        _ => (
            trigger.consecutive_failures,
            trigger.paused_at,
            trigger.pause_reason.clone(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::event_bus::BroadcastEventBus;
    use crate::ids::{TriggerId, WorkflowDefinitionId};
    use crate::model::{PredicateClause, PredicateOperator, TriggerStatus};
    use crate::queue::InMemoryQueue;
    use serde_json::json;

    fn workflow() -> WorkflowDefinition {
        use crate::model::{BundleRef, RetryPolicy, StepKind, WorkflowStep};
        let now = Utc::now();
        let mut def = WorkflowDefinition {
            id: WorkflowDefinitionId::new(),
            slug: "w1".into(),
            name: "w1".into(),
            version: 1,
            description: None,
            steps: vec![WorkflowStep {
                id: "a".into(),
                depends_on: Vec::new(),
                retry_policy: RetryPolicy::default(),
                kind: StepKind::Job {
                    bundle: BundleRef {
                        strategy: None,
                        slug: "noop".into(),
                        version: None,
                        export_name: None,
                        entry_point: None,
                    },
                },
                store_result_as: None,
                produces: Vec::new(),
            }],
            parameters_schema: serde_json::Value::Null,
            default_parameters: serde_json::Value::Null,
            output_schema: serde_json::Value::Null,
            metadata: serde_json::Value::Null,
            dag: Default::default(),
            created_at: now,
            updated_at: now,
        };
        crate::dag::validate_and_normalize(&mut def).unwrap();
        def
    }

    fn trigger(event_type: &str) -> EventTrigger {
        let now = Utc::now();
        EventTrigger {
            id: TriggerId::new(),
            workflow_definition_id: WorkflowDefinitionId::new(),
            event_type: event_type.to_string(),
            source_filter: None,
            predicates: Vec::new(),
            parameter_template: json!({"action": "{{payload.action}}"}),
            run_key_template: Some("{{payload.id}}".to_string()),
            idempotency_key_expression: None,
            throttle_window_ms: None,
            throttle_count: None,
            max_concurrency: None,
            metadata: serde_json::Value::Null,
            status: TriggerStatus::Active,
            consecutive_failures: 0,
            paused_at: None,
            pause_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn event(event_type: &str, payload: serde_json::Value) -> EventEnvelope {
        EventEnvelope {
            id: crate::ids::EventId::new(),
            event_type: event_type.to_string(),
            source: "github".to_string(),
            occurred_at: Utc::now(),
            payload,
            correlation_id: None,
            ttl_ms: None,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn matching_event_launches_a_run() {
        let engine = DeliveryEngine::new(system_clock(), Arc::new(BroadcastEventBus::new(16)));
        let executor = Executor::new(InMemoryQueue::new(), system_clock());
        let def = workflow();
        let t = trigger("push");
        let e = event("push", json!({"action": "opened", "id": "pr-1"}));

        let delivery = engine.deliver(&t, &def, &e, &executor).await.unwrap().unwrap();
        assert_eq!(delivery.status, DeliveryStatus::Launched);
        assert!(delivery.workflow_run_id.is_some());
    }

    #[tokio::test]
    async fn mismatched_event_type_produces_no_delivery() {
        let engine = DeliveryEngine::new(system_clock(), Arc::new(BroadcastEventBus::new(16)));
        let executor = Executor::new(InMemoryQueue::new(), system_clock());
        let def = workflow();
        let t = trigger("push");
        let e = event("pull_request", json!({}));

        let delivery = engine.deliver(&t, &def, &e, &executor).await.unwrap();
        assert!(delivery.is_none());
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_skipped() {
        let engine = DeliveryEngine::new(system_clock(), Arc::new(BroadcastEventBus::new(16)));
        let executor = Executor::new(InMemoryQueue::new(), system_clock());
        let def = workflow();
        let mut t = trigger("push");
        t.idempotency_key_expression = Some("fixed-key".to_string());
        t.run_key_template = None;

        let first = engine
            .deliver(&t, &def, &event("push", json!({"action": "opened", "id": "pr-1"})), &executor)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, DeliveryStatus::Launched);

        let second = engine
            .deliver(&t, &def, &event("push", json!({"action": "opened", "id": "pr-2"})), &executor)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, DeliveryStatus::Skipped);
    }

    #[tokio::test]
    async fn throttle_limits_launches_within_window() {
        let engine = DeliveryEngine::new(system_clock(), Arc::new(BroadcastEventBus::new(16)));
        let executor = Executor::new(InMemoryQueue::new(), system_clock());
        let def = workflow();
        let mut t = trigger("push");
        t.throttle_window_ms = Some(60_000);
        t.throttle_count = Some(1);

        let first = engine
            .deliver(&t, &def, &event("push", json!({"action": "opened", "id": "pr-1"})), &executor)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.status, DeliveryStatus::Launched);

        let second = engine
            .deliver(&t, &def, &event("push", json!({"action": "opened", "id": "pr-2"})), &executor)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.status, DeliveryStatus::Throttled);
        assert!(second.throttled_until.is_some());
    }
}
