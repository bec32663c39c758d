//! Time sources for buckets.
//!
//! Buckets never sample time on their own: every registry owns a [`Clock`]
//! and hands it to the buckets it creates, so tests can pin "now" and replay
//! exact tick boundaries.

use crate::types::TimeUnits;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of the current time.
///
/// Wall-clock time is used so that distributed buckets on different machines
/// agree on tick boundaries.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> SystemTime;
}

/// [`Clock`] backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// A clock that only moves when told to.
///
/// ```rust
/// use rate_guard_bucket::{Clock, ManualClock};
/// use std::time::{Duration, UNIX_EPOCH};
///
/// let clock = ManualClock::new(UNIX_EPOCH);
/// clock.advance(Duration::from_millis(250));
/// assert_eq!(clock.now(), UNIX_EPOCH + Duration::from_millis(250));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub fn new(now: SystemTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Starts the clock at the current wall-clock time.
    pub fn starting_now() -> Self {
        Self::new(SystemTime::now())
    }

    pub fn set(&self, now: SystemTime) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Signed nanoseconds from `origin` to `now`, saturating at the `i64` range.
pub(crate) fn nanos_between(origin: SystemTime, now: SystemTime) -> TimeUnits {
    signed_between(origin, now, |d| d.as_nanos())
}

/// Signed microseconds since the Unix epoch, saturating at the `i64` range.
pub(crate) fn micros_since_epoch(now: SystemTime) -> TimeUnits {
    signed_between(UNIX_EPOCH, now, |d| d.as_micros())
}

/// Inverse of [`micros_since_epoch`].
pub(crate) fn system_time_from_micros(micros: TimeUnits) -> SystemTime {
    let magnitude = Duration::from_micros(micros.unsigned_abs());
    if micros >= 0 {
        UNIX_EPOCH + magnitude
    } else {
        UNIX_EPOCH - magnitude
    }
}

/// Converts a duration to `i64` units, saturating instead of overflowing.
pub(crate) fn saturating_units(duration: Duration, unit: fn(&Duration) -> u128) -> TimeUnits {
    TimeUnits::try_from(unit(&duration)).unwrap_or(TimeUnits::MAX)
}

fn signed_between(origin: SystemTime, now: SystemTime, unit: fn(&Duration) -> u128) -> TimeUnits {
    match now.duration_since(origin) {
        Ok(ahead) => saturating_units(ahead, unit),
        Err(behind) => -saturating_units(behind.duration(), unit),
    }
}
