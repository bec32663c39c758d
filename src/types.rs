//! Scalar aliases shared by every bucket implementation.
//!
//! Token counts are signed: a bucket's available count goes negative while
//! callers hold reservations on tokens that have not been refilled yet.

use std::time::Duration;

/// Signed token count used for capacities, quanta, requests and grants.
pub type Tokens = i64;

/// Index of a refill step, counted from the bucket's start time.
pub type Tick = i64;

/// Abstract time value consumed by [`TokenBucketCore`](crate::cores::TokenBucketCore).
///
/// The core never interprets the unit. The in-process bucket feeds it
/// nanoseconds, the distributed bucket microseconds since the Unix epoch.
pub type TimeUnits = i64;

/// Upper bound that never rejects a reservation.
pub const INFINITE_WAIT: Duration = Duration::MAX;
