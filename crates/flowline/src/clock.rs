//! Injectable clock so throttle windows, cron catch-up, and cooldown
//! backoff are deterministic under test.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;

/// A source of "now". Production code uses [`SystemClock`]; tests use
/// [`FixedClock`] to control time without sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time via [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only advances when told to. Used in tests exercising
/// throttle windows, retry backoff, and schedule catch-up.
#[derive(Debug, Clone)]
pub struct FixedClock {
    inner: Arc<RwLock<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(start)),
        }
    }

    pub fn advance(&self, delta: chrono::Duration) {
        *self.inner.write() += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.inner.write() = at;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.inner.read()
    }
}

/// A shared, dynamically dispatched clock handle.
pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}
