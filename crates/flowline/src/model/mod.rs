//! Domain entities (§3 of the design document). Each submodule owns one
//! cluster of related entities and the normalization/invariant helpers
//! that belong on them directly; cross-entity operations live in the
//! component modules (`dag`, `manifest_store`, `executor`, `events`, ...).

pub mod asset;
pub mod compaction;
pub mod dataset;
pub mod event;
pub mod manifest;
pub mod run;
pub mod schedule;
pub mod trigger;
pub mod workflow;

pub use asset::{
    AssetDeclaration, AssetDirection, AssetSnapshot, AutoMaterializePolicy, DynamicPartitioning,
    FreshnessPolicy, MaterializePriority, Partitioning, StaticPartitioning, TimeGranularity,
    TimeWindowPartitioning,
};
pub use compaction::{CheckpointStatus, CompactionCheckpoint, CompactionGroup, CompactionStats};
pub use dataset::{Dataset, DatasetStatus, FieldType, SchemaField, SchemaVersion, StorageTarget, WriteFormat};
pub use event::{EventEnvelope, RawEventEnvelope};
pub use manifest::{Manifest, ManifestStatus, Partition, TimeRange};
pub use run::{RetryState, RetrySummary, RunStatus, RunStepStatus, WorkflowRun, WorkflowRunStep};
pub use schedule::{Schedule, ScheduleStatus};
pub use trigger::{
    DeliveryStatus, EventTrigger, PredicateClause, PredicateOperator, TriggerDelivery,
    TriggerStatus,
};
pub use workflow::{
    BundleRef, BundleStrategy, DagMetadata, FanOutSpec, Jitter, RetryPolicy, RetryStrategy,
    ServiceTarget, StepKind, WorkflowDefinition, WorkflowStep,
};
