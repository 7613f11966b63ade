#![allow(clippy::unwrap_used)]

//! Fixture builders and an in-memory test harness for integration tests
//! against the `flowline` crate.
//!
//! - [`fixtures`]: builders for workflow definitions, steps, datasets,
//!   manifests, and partitions, each filling in an id and timestamps so a
//!   test only has to specify what it actually varies.
//! - [`harness`]: [`harness::TestHarness`], an in-memory [`flowline::Flowline`]
//!   paired with the [`flowline::clock::FixedClock`] backing it.

pub mod fixtures;
pub mod harness;

pub use harness::TestHarness;

/// Convenient glob import for test modules.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::harness::TestHarness;
}
