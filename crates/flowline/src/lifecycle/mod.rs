//! Lifecycle Engine (C4): resumable, checkpointed compaction and
//! retention over manifest partitions, plus audit-log pruning.

pub mod audit;
pub mod compaction;
pub mod retention;

pub use compaction::CompactionEngine;
pub use retention::RetentionEngine;
