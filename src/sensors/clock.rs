//! Time capability for value cells.
//!
//! Cells read the current time through a [`Clock`] instead of calling
//! `Utc::now()` directly, so tests and simulations can drive time explicitly.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::RwLock;

/// Source of timestamps for value snapshots.
pub trait Clock: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock.
///
/// Time only moves when [`set`](Self::set) or [`advance`](Self::advance)
/// is called.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Create a clock frozen at `millis` milliseconds after the Unix epoch.
    pub fn at_millis(millis: i64) -> Self {
        Self::new(Utc.timestamp_millis_opt(millis).single().unwrap_or_default())
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write() = now;
    }

    /// Jump to `millis` milliseconds after the Unix epoch.
    pub fn set_millis(&self, millis: i64) {
        if let Some(now) = Utc.timestamp_millis_opt(millis).single() {
            self.set(now);
        }
    }

    /// Move time forward by `by`.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.write();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}
