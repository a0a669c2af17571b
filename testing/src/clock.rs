//! Deterministic clocks.

#![allow(clippy::unwrap_used)] // Test infrastructure: a poisoned lock is a failed test.

use chrono::{DateTime, Duration, Utc};
use circulate_core::environment::Clock;
use std::sync::{Arc, Mutex};

/// Fixed clock: always returns the same time.
///
/// ```
/// use circulate_testing::{FixedClock, test_clock};
/// use circulate_core::environment::Clock;
///
/// let clock = test_clock();
/// assert_eq!(clock.now(), clock.now());
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a fixed clock at the given time.
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// A clock tests can move: start somewhere, advance past due dates, observe
/// the late-fee arithmetic change.
#[derive(Debug, Clone)]
pub struct SteppingClock {
    time: Arc<Mutex<DateTime<Utc>>>,
}

impl SteppingClock {
    /// Create a stepping clock starting at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.time.lock().unwrap() += by;
    }

    /// Jump the clock to an absolute time.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.time.lock().unwrap() = to;
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock().unwrap()
    }
}

/// The pinned instant most tests start from (2025-01-01 00:00:00 UTC).
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which cannot happen.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(test_epoch())
}

/// The raw pinned instant, for building stepping clocks and assertions.
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which cannot happen.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_epoch() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
        .expect("hardcoded timestamp should always parse")
        .with_timezone(&Utc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_never_moves() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn stepping_clock_advances() {
        let clock = SteppingClock::new(test_epoch());
        clock.advance(Duration::days(8));
        assert_eq!(clock.now(), test_epoch() + Duration::days(8));

        clock.set(test_epoch());
        assert_eq!(clock.now(), test_epoch());
    }
}
