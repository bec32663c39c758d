//! Buckets shared across processes through a Redis hash per bucket.
//!
//! A bucket is the hash at its name, with the fields listed in [`script`].
//! Every operation is one round trip running a Lua script that refills and
//! updates the hash atomically on the server, so callers on different
//! machines observe one ordered history per bucket without any client-side
//! lock.
//!
//! # Failure handling
//!
//! * A missing key (never created, or expired) reads as an empty bucket:
//!   `acquire` and `available` return 0, `try_acquire_within` grants with no
//!   wait. This fails open on purpose; recreate the bucket to enforce limits
//!   again.
//! * Any other store error follows the storage's [`FailurePolicy`]: logged and
//!   degraded to "no tokens" by default, or returned to the caller.

pub mod script;
pub mod store;

pub use script::BucketScript;
pub use store::{BucketStore, RedisStore};

use crate::bucket::{Bucket, Reservation, Storage};
use crate::clock::{micros_since_epoch, saturating_units, system_time_from_micros, Clock, SystemClock};
use crate::config::{BucketConfig, FailurePolicy, RedisStorageConfig};
use crate::error::{BucketResult, StoreError};
use crate::types::Tokens;
use async_trait::async_trait;
use script::{CAPACITY_FIELD, DENIED, START_TIME_FIELD};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace, warn};

/// Handle to a bucket stored in a [`BucketStore`].
///
/// Handles are cheap; any number of them, in any number of processes, may
/// point at the same key.
#[derive(Debug)]
pub struct RedisBucket {
    key: String,
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    policy: FailurePolicy,
    start_time: SystemTime,
    capacity: Tokens,
}

impl RedisBucket {
    /// [`Bucket::acquire`] at an explicit time.
    pub async fn acquire_at(&self, now: SystemTime, count: Tokens) -> BucketResult<Tokens> {
        if count <= 0 {
            return Ok(0);
        }
        let args = [micros_since_epoch(now), count];
        match self.store.eval(BucketScript::Acquire, &self.key, &args).await {
            Ok(Some(granted)) => {
                trace!(bucket = %self.key, count, granted, "acquire");
                Ok(granted)
            }
            Ok(None) => Ok(0),
            Err(err) => self.degrade(BucketScript::Acquire, err, 0),
        }
    }

    /// [`Bucket::try_acquire_within`] at an explicit time.
    pub async fn try_acquire_at(&self, now: SystemTime, count: Tokens, max_wait: Duration) -> BucketResult<Reservation> {
        if count <= 0 {
            return Ok(Reservation::Granted(Duration::ZERO));
        }
        let args = [
            micros_since_epoch(now),
            count,
            saturating_units(max_wait, Duration::as_micros),
        ];
        match self.store.eval(BucketScript::TryAcquire, &self.key, &args).await {
            Ok(Some(DENIED)) => {
                trace!(bucket = %self.key, count, "reservation exceeds max wait");
                Ok(Reservation::Denied)
            }
            Ok(Some(wait_us)) => {
                trace!(bucket = %self.key, count, wait_us, "reserved");
                Ok(Reservation::Granted(Duration::from_micros(wait_us.unsigned_abs())))
            }
            Ok(None) => Ok(Reservation::Granted(Duration::ZERO)),
            Err(err) => self.degrade(BucketScript::TryAcquire, err, Reservation::Denied),
        }
    }

    /// [`Bucket::available`] at an explicit time.
    pub async fn available_at(&self, now: SystemTime) -> BucketResult<Tokens> {
        let args = [micros_since_epoch(now)];
        match self.store.eval(BucketScript::Available, &self.key, &args).await {
            Ok(available) => Ok(available.unwrap_or(0)),
            Err(err) => self.degrade(BucketScript::Available, err, 0),
        }
    }

    fn degrade<T>(&self, script: BucketScript, err: StoreError, fallback: T) -> BucketResult<T> {
        match self.policy {
            FailurePolicy::Degrade => {
                warn!(bucket = %self.key, %script, error = %err, "bucket store call failed");
                Ok(fallback)
            }
            FailurePolicy::Propagate => Err(err.into()),
        }
    }
}

#[async_trait]
impl Bucket for RedisBucket {
    fn name(&self) -> &str {
        &self.key
    }

    fn start_time(&self) -> SystemTime {
        self.start_time
    }

    fn capacity(&self) -> Tokens {
        self.capacity
    }

    async fn acquire(&self, count: Tokens) -> BucketResult<Tokens> {
        self.acquire_at(self.clock.now(), count).await
    }

    async fn try_acquire_within(&self, count: Tokens, max_wait: Duration) -> BucketResult<Reservation> {
        self.try_acquire_at(self.clock.now(), count, max_wait).await
    }

    async fn available(&self) -> BucketResult<Tokens> {
        self.available_at(self.clock.now()).await
    }
}

/// Registry of buckets kept in a shared store.
///
/// Registries hold no bucket state of their own; two registries over the
/// same store see the same buckets.
#[derive(Debug, Clone)]
pub struct RedisStorage {
    store: Arc<dyn BucketStore>,
    clock: Arc<dyn Clock>,
    expire: Duration,
    policy: FailurePolicy,
}

impl RedisStorage {
    /// Connects to Redis as described by `config`.
    pub async fn connect(config: &RedisStorageConfig) -> BucketResult<Self> {
        let store = RedisStore::open(&config.url).await?;
        Ok(Self::new(Arc::new(store), config.expire).with_failure_policy(config.failure_policy))
    }

    /// A registry over `store`, creating keys that expire after `expire`
    /// (zero for no expiry).
    pub fn new(store: Arc<dyn BucketStore>, expire: Duration) -> Self {
        RedisStorage {
            store,
            clock: Arc::new(SystemClock),
            expire,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.policy
    }
}

#[async_trait]
impl Storage for RedisStorage {
    type Bucket = RedisBucket;

    async fn ping(&self) -> BucketResult<()> {
        Ok(self.store.ping().await?)
    }

    async fn create_with_quantum(
        &self,
        name: &str,
        fill_interval: Duration,
        capacity: Tokens,
        quantum: Tokens,
    ) -> BucketResult<Arc<RedisBucket>> {
        let config = BucketConfig::with_quantum(fill_interval, capacity, quantum);
        let fill_interval_us = config.fill_interval_micros()?;
        self.ping().await?;

        let args = [
            micros_since_epoch(self.clock.now()),
            fill_interval_us,
            capacity,
            quantum,
            saturating_units(self.expire, Duration::as_millis),
        ];
        let created = self.store.eval(BucketScript::Create, name, &args).await?;
        if created == Some(1) {
            debug!(bucket = name, ?fill_interval, capacity, quantum, "created shared bucket");
        } else {
            debug!(bucket = name, "reusing shared bucket");
        }

        // Parameters of an existing bucket win over the ones passed in
        let fields = self.store.read_fields(name, &[START_TIME_FIELD, CAPACITY_FIELD]).await?;
        let (start_us, capacity) = match fields.as_slice() {
            [Some(start_us), Some(capacity)] => (*start_us, *capacity),
            _ => {
                return Err(StoreError::Malformed {
                    key: name.to_string(),
                    reason: format!("expected `{}` and `{}`", START_TIME_FIELD, CAPACITY_FIELD),
                }
                .into())
            }
        };

        Ok(Arc::new(RedisBucket {
            key: name.to_string(),
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            policy: self.policy,
            start_time: system_time_from_micros(start_us),
            capacity,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use redis::{Script, Value};
    use redis_test::{MockCmd, MockRedisConnection};
    use std::time::UNIX_EPOCH;

    const NOW_US: i64 = 1_700_000_000_000_000;

    fn evalsha(script: BucketScript, key: &str, args: &[i64]) -> redis::Cmd {
        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(Script::new(&script.source()).get_hash()).arg(1).arg(key);
        for arg in args {
            cmd.arg(*arg);
        }
        cmd
    }

    fn storage(commands: Vec<MockCmd>) -> RedisStorage {
        let clock = Arc::new(ManualClock::new(UNIX_EPOCH + Duration::from_micros(NOW_US as u64)));
        let store = RedisStore::new_with_connection(MockRedisConnection::new(commands));
        RedisStorage::new(Arc::new(store), Duration::from_secs(3 * 60 * 60)).with_clock(clock)
    }

    #[tokio::test]
    async fn test_create_then_acquire_over_redis_commands() {
        let storage = storage(vec![
            MockCmd::new(redis::cmd("PING"), Ok(Value::Status("PONG".to_string()))),
            MockCmd::new(
                evalsha(BucketScript::Create, "api", &[NOW_US, 250_000, 10, 1, 10_800_000]),
                Ok(Value::Int(1)),
            ),
            MockCmd::new(
                redis::cmd("HMGET").arg("api").arg(START_TIME_FIELD).arg(CAPACITY_FIELD),
                Ok(Value::Bulk(vec![
                    Value::Data(NOW_US.to_string().into_bytes()),
                    Value::Data(b"10".to_vec()),
                ])),
            ),
            MockCmd::new(evalsha(BucketScript::Acquire, "api", &[NOW_US, 3]), Ok(Value::Int(3))),
            MockCmd::new(
                evalsha(BucketScript::TryAcquire, "api", &[NOW_US, 9, i64::MAX]),
                Ok(Value::Int(500_000)),
            ),
        ]);

        let bucket = storage.create("api", Duration::from_millis(250), 10).await.unwrap();
        assert_eq!(bucket.capacity(), 10);
        assert_eq!(bucket.start_time(), UNIX_EPOCH + Duration::from_micros(NOW_US as u64));
        assert_eq!(bucket.acquire(3).await.unwrap(), 3);
        assert_eq!(bucket.try_acquire(9).await.unwrap(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_nil_script_reply_fails_open() {
        let storage = storage(vec![
            MockCmd::new(redis::cmd("PING"), Ok(Value::Status("PONG".to_string()))),
            MockCmd::new(
                evalsha(BucketScript::Create, "gone", &[NOW_US, 1_000, 2, 1, 10_800_000]),
                Ok(Value::Int(0)),
            ),
            MockCmd::new(
                redis::cmd("HMGET").arg("gone").arg(START_TIME_FIELD).arg(CAPACITY_FIELD),
                Ok(Value::Bulk(vec![
                    Value::Data(NOW_US.to_string().into_bytes()),
                    Value::Data(b"2".to_vec()),
                ])),
            ),
            MockCmd::new(evalsha(BucketScript::Acquire, "gone", &[NOW_US, 1]), Ok(Value::Nil)),
            MockCmd::new(
                evalsha(BucketScript::TryAcquire, "gone", &[NOW_US, 1, 0]),
                Ok(Value::Nil),
            ),
            MockCmd::new(evalsha(BucketScript::Available, "gone", &[NOW_US]), Ok(Value::Nil)),
        ]);
        let storage = storage.with_failure_policy(FailurePolicy::Propagate);

        let bucket = storage.create("gone", Duration::from_millis(1), 2).await.unwrap();
        assert_eq!(bucket.acquire(1).await.unwrap(), 0);
        assert_eq!(
            bucket.try_acquire_within(1, Duration::ZERO).await.unwrap(),
            Reservation::Granted(Duration::ZERO)
        );
        assert_eq!(bucket.available().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_without_fields_is_malformed() {
        let storage = storage(vec![
            MockCmd::new(redis::cmd("PING"), Ok(Value::Status("PONG".to_string()))),
            MockCmd::new(
                evalsha(BucketScript::Create, "half", &[NOW_US, 1_000, 2, 1, 10_800_000]),
                Ok(Value::Int(0)),
            ),
            MockCmd::new(
                redis::cmd("HMGET").arg("half").arg(START_TIME_FIELD).arg(CAPACITY_FIELD),
                Ok(Value::Bulk(vec![Value::Nil, Value::Data(b"2".to_vec())])),
            ),
        ]);

        assert!(matches!(
            storage.create("half", Duration::from_millis(1), 2).await,
            Err(crate::BucketError::Store(StoreError::Malformed { .. }))
        ));
    }
}
