//! error.rs
//! Configuration, store and bucket error types.

use crate::types::Tokens;
use std::time::Duration;
use thiserror::Error;

/// A bucket was requested with parameters that can never describe a valid bucket.
///
/// These are programmer errors: the registry refuses to build the bucket and
/// nothing is clamped into range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("token bucket fill interval is not > 0")]
    NonPositiveFillInterval,
    /// The interval is positive but cannot be expressed in the backend's time unit.
    #[error("token bucket fill interval {0:?} is out of range for this backend")]
    FillIntervalOutOfRange(Duration),
    #[error("token bucket capacity is not > 0 (got {0})")]
    NonPositiveCapacity(Tokens),
    #[error("token bucket quantum is not > 0 (got {0})")]
    NonPositiveQuantum(Tokens),
}

/// Failure talking to the shared store behind a distributed bucket.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
    /// The key exists but does not hold the expected bucket fields.
    #[error("malformed bucket record at `{key}`: {reason}")]
    Malformed { key: String, reason: String },
    /// Store-agnostic outage, reported by non-Redis [`BucketStore`](crate::distributed::BucketStore)s.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Error returned by [`Bucket`](crate::Bucket) and [`Storage`](crate::Storage) operations.
#[derive(Debug, Error)]
pub enum BucketError {
    #[error("invalid bucket configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("bucket store failure: {0}")]
    Store(#[from] StoreError),
}

impl BucketError {
    /// Returns `true` when the error came from the store rather than from the caller.
    pub fn is_store(&self) -> bool {
        matches!(self, BucketError::Store(_))
    }
}

/// Result type for bucket and registry operations.
pub type BucketResult<T> = Result<T, BucketError>;
