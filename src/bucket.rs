//! Capability set shared by every bucket backend.
//!
//! [`Bucket`] is what callers rate-limit with; [`Storage`] creates or looks up
//! named buckets. Both traits are object safe, so `Arc<dyn Bucket>` can hide
//! the backend from the rest of a service.

use crate::config::BucketConfig;
use crate::error::BucketResult;
use crate::types::{Tokens, INFINITE_WAIT};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Outcome of [`Bucket::try_acquire_within`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The tokens are taken. Use them after waiting this long
    /// ([`Duration::ZERO`] when they were already available).
    Granted(Duration),
    /// The wait would have exceeded the bound. Nothing was reserved.
    Denied,
}

impl Reservation {
    /// Time to wait before using the tokens; zero when denied.
    pub fn wait(&self) -> Duration {
        match self {
            Reservation::Granted(wait) => *wait,
            Reservation::Denied => Duration::ZERO,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Reservation::Granted(_))
    }
}

/// A named token bucket.
///
/// Every operation first refills the bucket lazily to the current tick, then
/// reads or changes the available count as one atomic step.
#[async_trait]
pub trait Bucket: Send + Sync + fmt::Debug {
    /// Name the bucket was created under.
    fn name(&self) -> &str;

    /// Instant at which tick 0 began.
    fn start_time(&self) -> SystemTime;

    fn capacity(&self) -> Tokens;

    /// Takes up to `count` immediately available tokens and returns how many
    /// were taken. Never waits and never reserves.
    async fn acquire(&self, count: Tokens) -> BucketResult<Tokens>;

    /// Takes `count` tokens, reserving future ones when the bucket is short.
    ///
    /// Returns [`Reservation::Denied`] without reserving anything when the
    /// tokens would arrive later than `max_wait` from now.
    async fn try_acquire_within(&self, count: Tokens, max_wait: Duration) -> BucketResult<Reservation>;

    /// Takes `count` tokens and returns how long to wait before using them.
    async fn try_acquire(&self, count: Tokens) -> BucketResult<Duration> {
        Ok(self.try_acquire_within(count, INFINITE_WAIT).await?.wait())
    }

    /// Takes `count` tokens and sleeps until they are usable.
    ///
    /// Dropping the future cancels the sleep but not the reservation.
    async fn wait(&self, count: Tokens) -> BucketResult<()> {
        let wait = self.try_acquire(count).await?;
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }

    /// Returns the number of available tokens, negative while reserved.
    ///
    /// The refill is persisted as a side effect.
    async fn available(&self) -> BucketResult<Tokens>;
}

/// Registry of named buckets on one backend.
///
/// Creation is idempotent: asking for an existing name returns a handle to the
/// existing bucket and ignores the parameters of the repeated call.
#[async_trait]
pub trait Storage: Send + Sync {
    type Bucket: Bucket + 'static;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> BucketResult<()>;

    /// Creates or looks up the bucket `name`, filled with one token per tick.
    async fn create(&self, name: &str, fill_interval: Duration, capacity: Tokens) -> BucketResult<Arc<Self::Bucket>> {
        self.create_with_quantum(name, fill_interval, capacity, 1).await
    }

    /// Creates or looks up the bucket `name`, filled with `quantum` tokens per tick.
    ///
    /// Fails with [`BucketError::InvalidConfig`](crate::BucketError::InvalidConfig)
    /// when any parameter is not positive.
    async fn create_with_quantum(
        &self,
        name: &str,
        fill_interval: Duration,
        capacity: Tokens,
        quantum: Tokens,
    ) -> BucketResult<Arc<Self::Bucket>>;

    /// Creates or looks up the bucket `name` from a [`BucketConfig`].
    async fn create_with_config(&self, name: &str, config: &BucketConfig) -> BucketResult<Arc<Self::Bucket>> {
        self.create_with_quantum(name, config.fill_interval, config.capacity, config.quantum)
            .await
    }
}
