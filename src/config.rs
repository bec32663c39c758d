//! Bucket and storage configuration.
//!
//! Both structs deserialize from any serde format; durations are written as
//! integer milliseconds.

use crate::clock::saturating_units;
use crate::error::ConfigError;
use crate::types::{TimeUnits, Tokens};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters of one token bucket.
///
/// # Example
///
/// ```rust
/// use rate_guard_bucket::BucketConfig;
/// use std::time::Duration;
///
/// // 10 tokens, one token back every 250ms
/// let config = BucketConfig::new(Duration::from_millis(250), 10);
/// assert!(config.validate().is_ok());
///
/// let broken = BucketConfig::with_quantum(Duration::from_millis(250), 10, 0);
/// assert!(broken.validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Duration of one tick.
    #[serde(rename = "fill_interval_ms", with = "duration_ms")]
    pub fill_interval: Duration,
    /// Maximum number of tokens the bucket holds.
    pub capacity: Tokens,
    /// Tokens added per tick.
    #[serde(default = "default_quantum")]
    pub quantum: Tokens,
}

fn default_quantum() -> Tokens {
    1
}

impl BucketConfig {
    /// A bucket refilled one token per tick.
    pub fn new(fill_interval: Duration, capacity: Tokens) -> Self {
        Self::with_quantum(fill_interval, capacity, default_quantum())
    }

    pub fn with_quantum(fill_interval: Duration, capacity: Tokens, quantum: Tokens) -> Self {
        Self {
            fill_interval,
            capacity,
            quantum,
        }
    }

    /// Checks that every parameter is strictly positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fill_interval.is_zero() {
            return Err(ConfigError::NonPositiveFillInterval);
        }
        if self.capacity <= 0 {
            return Err(ConfigError::NonPositiveCapacity(self.capacity));
        }
        if self.quantum <= 0 {
            return Err(ConfigError::NonPositiveQuantum(self.quantum));
        }
        Ok(())
    }

    /// Fill interval in nanoseconds, the in-process time unit.
    pub(crate) fn fill_interval_nanos(&self) -> Result<TimeUnits, ConfigError> {
        self.fill_interval_in(Duration::as_nanos)
    }

    /// Fill interval in microseconds, the distributed time unit.
    ///
    /// Intervals below one microsecond cannot be represented and are refused.
    pub(crate) fn fill_interval_micros(&self) -> Result<TimeUnits, ConfigError> {
        self.fill_interval_in(Duration::as_micros)
    }

    fn fill_interval_in(&self, unit: fn(&Duration) -> u128) -> Result<TimeUnits, ConfigError> {
        self.validate()?;
        match saturating_units(self.fill_interval, unit) {
            0 | i64::MAX => Err(ConfigError::FillIntervalOutOfRange(self.fill_interval)),
            units => Ok(units),
        }
    }
}

/// How a distributed bucket reports a failed store round trip.
///
/// A missing key is never a failure: it always reads as an empty bucket that
/// requires no wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Log the fault and answer as if no tokens were available:
    /// `acquire`/`available` return `0`, `try_acquire_within` returns
    /// [`Reservation::Denied`](crate::Reservation::Denied).
    #[default]
    Degrade,
    /// Return the fault to the caller as [`BucketError::Store`](crate::BucketError::Store).
    Propagate,
}

/// Connection and retention settings for [`RedisStorage`](crate::distributed::RedisStorage).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStorageConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,
    /// Expiry set on a bucket key when it is created. Zero disables expiry.
    #[serde(rename = "expire_ms", with = "duration_ms")]
    pub expire: Duration,
    pub failure_policy: FailurePolicy,
}

impl Default for RedisStorageConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            expire: Duration::from_secs(3 * 60 * 60),
            failure_policy: FailurePolicy::default(),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
