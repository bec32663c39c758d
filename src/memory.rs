//! In-process buckets, each guarded by its own mutex.

use crate::bucket::{Bucket, Reservation, Storage};
use crate::clock::{nanos_between, saturating_units, Clock, SystemClock};
use crate::config::BucketConfig;
use crate::cores::TokenBucketCore;
use crate::error::BucketResult;
use crate::types::Tokens;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

/// A token bucket living in this process.
///
/// Every operation holds the bucket's lock for the whole refill and update
/// step, so operations on one bucket are totally ordered. Different buckets
/// never contend. The lock is never held across an `.await`.
///
/// The `*_at` methods take the current time explicitly and are what the
/// [`Bucket`] implementation calls with its clock's reading.
#[derive(Debug)]
pub struct MemoryBucket {
    name: String,
    start_time: SystemTime,
    clock: Arc<dyn Clock>,
    /// Core state; its time unit is nanoseconds since `start_time`
    state: Mutex<TokenBucketCore>,
}

impl MemoryBucket {
    /// Creates a full bucket starting at the clock's current time.
    pub fn new(name: impl Into<String>, config: BucketConfig, clock: Arc<dyn Clock>) -> BucketResult<Self> {
        let fill_interval = config.fill_interval_nanos()?;
        let start_time = clock.now();

        Ok(MemoryBucket {
            name: name.into(),
            start_time,
            clock,
            state: Mutex::new(TokenBucketCore::new(0, fill_interval, config.capacity, config.quantum)),
        })
    }

    /// [`Bucket::acquire`] at an explicit time.
    pub fn acquire_at(&self, now: SystemTime, count: Tokens) -> Tokens {
        let granted = self.state().acquire_at(self.offset(now), count);
        trace!(bucket = %self.name, count, granted, "acquire");
        granted
    }

    /// [`Bucket::try_acquire_within`] at an explicit time.
    pub fn try_acquire_at(&self, now: SystemTime, count: Tokens, max_wait: Duration) -> Reservation {
        let max_wait = saturating_units(max_wait, Duration::as_nanos);
        let outcome = self.state().try_acquire_at(self.offset(now), count, max_wait);

        match outcome {
            Some(wait) => {
                let wait = Duration::from_nanos(wait.unsigned_abs());
                trace!(bucket = %self.name, count, wait_ns = wait.as_nanos() as u64, "reserved");
                Reservation::Granted(wait)
            }
            None => {
                trace!(bucket = %self.name, count, "reservation exceeds max wait");
                Reservation::Denied
            }
        }
    }

    /// [`Bucket::available`] at an explicit time.
    pub fn available_at(&self, now: SystemTime) -> Tokens {
        self.state().available_at(self.offset(now))
    }

    fn offset(&self, now: SystemTime) -> i64 {
        nanos_between(self.start_time, now)
    }

    // Every critical section leaves the core consistent, so a panic elsewhere
    // does not make the state unusable.
    fn state(&self) -> MutexGuard<'_, TokenBucketCore> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn start_time(&self) -> SystemTime {
        self.start_time
    }

    fn capacity(&self) -> Tokens {
        self.state().capacity()
    }

    async fn acquire(&self, count: Tokens) -> BucketResult<Tokens> {
        Ok(self.acquire_at(self.clock.now(), count))
    }

    async fn try_acquire_within(&self, count: Tokens, max_wait: Duration) -> BucketResult<Reservation> {
        Ok(self.try_acquire_at(self.clock.now(), count, max_wait))
    }

    async fn available(&self) -> BucketResult<Tokens> {
        Ok(self.available_at(self.clock.now()))
    }
}

/// Registry of [`MemoryBucket`]s owned by this process.
///
/// # Example
///
/// ```rust
/// use rate_guard_bucket::{Bucket, MemoryStorage, Storage};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), rate_guard_bucket::BucketError> {
/// let storage = MemoryStorage::new();
/// let bucket = storage.create("uploads", Duration::from_secs(1), 5).await?;
///
/// assert_eq!(bucket.acquire(3).await?, 3);
///
/// // Same name, different parameters: the existing bucket comes back
/// let again = storage.create("uploads", Duration::from_millis(1), 100).await?;
/// assert_eq!(again.capacity(), 5);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct MemoryStorage {
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Arc<MemoryBucket>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// A registry whose buckets read time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        MemoryStorage {
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up an existing bucket without creating it.
    pub fn get(&self, name: &str) -> Option<Arc<MemoryBucket>> {
        self.buckets().get(name).cloned()
    }

    /// Number of buckets created so far.
    pub fn len(&self) -> usize {
        self.buckets().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<String, Arc<MemoryBucket>>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    type Bucket = MemoryBucket;

    async fn ping(&self) -> BucketResult<()> {
        Ok(())
    }

    async fn create_with_quantum(
        &self,
        name: &str,
        fill_interval: Duration,
        capacity: Tokens,
        quantum: Tokens,
    ) -> BucketResult<Arc<MemoryBucket>> {
        let config = BucketConfig::with_quantum(fill_interval, capacity, quantum);
        config.fill_interval_nanos()?;

        let mut buckets = self.buckets();
        if let Some(existing) = buckets.get(name) {
            debug!(bucket = name, "reusing in-process bucket");
            return Ok(Arc::clone(existing));
        }

        let bucket = Arc::new(MemoryBucket::new(name, config, Arc::clone(&self.clock))?);
        buckets.insert(name.to_string(), Arc::clone(&bucket));
        debug!(bucket = name, ?fill_interval, capacity, quantum, "created in-process bucket");
        Ok(bucket)
    }
}
