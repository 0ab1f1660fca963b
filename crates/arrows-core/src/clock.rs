//! Time source seam.
//!
//! The coordinator timestamps trial presentation and answer receipt through a
//! [`Clock`] so tests can drive time by hand.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds since the Unix epoch.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MillisecondTimestamp(i64);

impl MillisecondTimestamp {
    /// Wrap a raw millisecond count.
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Raw millisecond count.
    pub const fn as_millis(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MillisecondTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Source of the current time.
pub trait Clock: Send + Sync + 'static {
    /// Current wall-clock time.
    fn now(&self) -> MillisecondTimestamp;
}

/// Wall clock backed by `chrono::Utc`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> MillisecondTimestamp {
        MillisecondTimestamp(chrono::Utc::now().timestamp_millis())
    }
}

/// Hand-driven clock for tests.
#[derive(Debug, Default)]
pub struct ManualClock(AtomicI64);

impl ManualClock {
    /// Clock frozen at `start`.
    pub fn new(start: MillisecondTimestamp) -> Self {
        Self(AtomicI64::new(start.0))
    }

    /// Jump to `at`.
    pub fn set(&self, at: MillisecondTimestamp) {
        self.0.store(at.0, Ordering::SeqCst);
    }

    /// Move forward by `millis`.
    pub fn advance(&self, millis: i64) {
        let _ = self.0.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> MillisecondTimestamp {
        MillisecondTimestamp(self.0.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(MillisecondTimestamp::from_millis(1_000));
        assert_eq!(clock.now().as_millis(), 1_000);
        clock.advance(250);
        assert_eq!(clock.now().as_millis(), 1_250);
        clock.set(MillisecondTimestamp::from_millis(5));
        assert_eq!(clock.now().as_millis(), 5);
    }

    #[test]
    fn system_clock_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now().as_millis() > 1_577_836_800_000);
    }

    #[test]
    fn timestamps_serialize_as_integers() {
        let json = serde_json::to_string(&MillisecondTimestamp::from_millis(42)).unwrap();
        assert_eq!(json, "42");
    }
}
