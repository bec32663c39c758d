//! Lock-free, I/O-free bucket algorithms.
//!
//! A core only knows abstract time units and ticks. Backends own the clock,
//! the unit conversion and the serialization of concurrent callers:
//!
//! | Backend | Time unit | Serialization |
//! |---------|-----------|---------------|
//! | [`MemoryBucket`](crate::memory::MemoryBucket) | nanoseconds since bucket start | one mutex per bucket |
//! | [`RedisBucket`](crate::distributed::RedisBucket) | microseconds since the Unix epoch | atomic server-side script |

pub mod token_bucket_core;
pub use token_bucket_core::TokenBucketCore;
