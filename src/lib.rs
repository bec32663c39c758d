//! Lazily refilled token buckets for admission control.
//!
//! A bucket holds up to `capacity` tokens and gains `quantum` tokens every
//! `fill_interval`. Nothing ticks in the background: each call computes the
//! refill from the time elapsed since the bucket started, then takes tokens.
//!
//! Two backends implement the same [`Bucket`] and [`Storage`] traits:
//!
//! - **[`MemoryStorage`]** keeps buckets in this process, one mutex per bucket.
//! - **[`RedisStorage`]** keeps each bucket in a Redis hash and runs every
//!   operation as an atomic Lua script, so any number of processes can share
//!   a limit.
//!
//! # Quick Start
//!
//! ```rust
//! use rate_guard_bucket::{Bucket, MemoryStorage, Storage};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), rate_guard_bucket::BucketError> {
//! let storage = MemoryStorage::new();
//!
//! // 10 tokens, one more every 100ms
//! let bucket = storage.create("api", Duration::from_millis(100), 10).await?;
//!
//! // Take what is there right now
//! assert_eq!(bucket.acquire(4).await?, 4);
//!
//! // Reserve 8 tokens: 6 are available, the other 2 arrive within 200ms
//! let wait = bucket.try_acquire(8).await?;
//! assert!(wait <= Duration::from_millis(200));
//! # Ok(())
//! # }
//! ```
//!
//! # Core Concepts
//!
//! ## Acquire, reserve, wait
//! - [`Bucket::acquire`] takes up to the requested count of tokens available
//!   now and never waits.
//! - [`Bucket::try_acquire_within`] takes the full count, borrowing from
//!   future refills, and reports how long the caller must wait before using
//!   the tokens. A later caller's wait is computed after earlier reservations,
//!   which queues concurrent waiters fairly without an explicit queue.
//! - [`Bucket::wait`] reserves and then sleeps for the reported duration.
//!
//! ## Time
//! Every registry reads time from a [`Clock`]. Use [`ManualClock`] to drive
//! buckets deterministically in tests; backends also expose `*_at` methods
//! taking an explicit [`SystemTime`](std::time::SystemTime).
//!
//! ## Error Handling
//! - Non-positive fill interval, capacity or quantum is refused with
//!   [`BucketError::InvalidConfig`].
//! - Store faults on a distributed bucket are logged and degraded to "no
//!   tokens" by default, or returned as [`BucketError::Store`] with
//!   [`FailurePolicy::Propagate`].
//! - Requests for zero or fewer tokens always succeed without effect.

pub mod bucket;
pub mod clock;
pub mod config;
pub mod cores;
pub mod distributed;
pub mod error;
pub mod memory;
pub mod types;

pub use bucket::{Bucket, Reservation, Storage};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BucketConfig, FailurePolicy, RedisStorageConfig};
pub use distributed::{BucketScript, BucketStore, RedisBucket, RedisStorage, RedisStore};
pub use error::{BucketError, BucketResult, ConfigError, StoreError};
pub use memory::{MemoryBucket, MemoryStorage};
pub use types::{Tick, TimeUnits, Tokens, INFINITE_WAIT};
