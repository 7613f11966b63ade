//! Event & Schedule Engine (C7): envelope ingest is `model::event`;
//! predicate matching, per-trigger delivery pipeline, and trigger
//! auto-pause live here, alongside cron schedule materialization.

pub mod delivery;
pub mod predicate;
pub mod schedule;

pub use delivery::{next_failure_state, DeliveryEngine};
pub use schedule::{materialize, next_fire_at};
