use crate::types::{Tick, TimeUnits, Tokens};

/// Lazily refilled token bucket state.
///
/// The bucket starts full with `capacity` tokens and gains `quantum` tokens
/// at every tick boundary, where tick `n` begins at `start + n * fill_interval`.
/// No timer drives the refill: every operation first catches the state up to
/// the tick of the supplied `now`, then reads or mutates the available count.
///
/// `TokenBucketCore` holds no lock and performs no I/O. Callers serialize
/// access themselves: [`MemoryBucket`](crate::memory::MemoryBucket) wraps it
/// in a mutex, and the distributed scripts apply the same transitions inside
/// the store.
///
/// # Reservations
///
/// [`try_acquire_at`](Self::try_acquire_at) may drive the available count
/// below zero. The debt stays on the books, so the next caller computes its
/// wait after the tokens already promised to earlier callers.
///
/// # Example
///
/// ```rust
/// use rate_guard_bucket::cores::TokenBucketCore;
///
/// // Ticks of 250 time units, capacity 10, one token per tick
/// let mut bucket = TokenBucketCore::new(0, 250, 10, 1);
///
/// assert_eq!(bucket.acquire_at(0, 10), 10);
/// assert_eq!(bucket.acquire_at(0, 1), 0);
///
/// // Two tokens short: the second arrives at tick 2
/// assert_eq!(bucket.try_acquire_at(0, 2, i64::MAX), Some(500));
/// assert_eq!(bucket.available_at(0), -2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketCore {
    /// Time at which tick 0 begins
    start: TimeUnits,
    /// Length of one tick
    fill_interval: TimeUnits,
    /// Maximum number of tokens the bucket can hold
    capacity: Tokens,
    /// Tokens added per tick
    quantum: Tokens,
    /// Tokens available as of `latest_tick`, negative while reserved
    avail: Tokens,
    /// Latest tick for which `avail` is known to be correct
    latest_tick: Tick,
}

impl TokenBucketCore {
    /// Creates a full bucket whose tick 0 begins at `start`.
    ///
    /// # Panics
    ///
    /// Panics if `fill_interval`, `capacity` or `quantum` is not positive.
    /// Use [`BucketConfig::validate`](crate::BucketConfig::validate) to check
    /// untrusted input first.
    pub fn new(start: TimeUnits, fill_interval: TimeUnits, capacity: Tokens, quantum: Tokens) -> Self {
        Self::restore(start, fill_interval, capacity, quantum, capacity, 0)
    }

    /// Rebuilds a bucket from persisted fields.
    ///
    /// # Panics
    ///
    /// Panics on non-positive parameters or a negative `latest_tick`.
    pub fn restore(
        start: TimeUnits,
        fill_interval: TimeUnits,
        capacity: Tokens,
        quantum: Tokens,
        avail: Tokens,
        latest_tick: Tick,
    ) -> Self {
        assert!(fill_interval > 0, "token bucket fill interval is not > 0");
        assert!(capacity > 0, "token bucket capacity is not > 0");
        assert!(quantum > 0, "token bucket quantum is not > 0");
        assert!(latest_tick >= 0, "token bucket latest tick is negative");

        TokenBucketCore {
            start,
            fill_interval,
            capacity,
            quantum,
            avail,
            latest_tick,
        }
    }

    #[inline]
    pub fn start(&self) -> TimeUnits {
        self.start
    }

    #[inline]
    pub fn fill_interval(&self) -> TimeUnits {
        self.fill_interval
    }

    #[inline]
    pub fn capacity(&self) -> Tokens {
        self.capacity
    }

    #[inline]
    pub fn quantum(&self) -> Tokens {
        self.quantum
    }

    /// Available count as of [`latest_tick`](Self::latest_tick), without refilling.
    #[inline]
    pub fn avail(&self) -> Tokens {
        self.avail
    }

    #[inline]
    pub fn latest_tick(&self) -> Tick {
        self.latest_tick
    }

    /// Returns the tick that `now` falls into.
    ///
    /// Times before `start` map to tick 0, and the result never moves behind
    /// `latest_tick`, so a clock stepping backwards cannot drain the bucket.
    #[inline]
    pub fn tick_at(&self, now: TimeUnits) -> Tick {
        let elapsed = now.saturating_sub(self.start);
        elapsed
            .div_euclid(self.fill_interval)
            .max(0)
            .max(self.latest_tick)
    }

    /// Takes up to `count` tokens that are available right now.
    ///
    /// Never reserves: a depleted bucket grants 0.
    ///
    /// # Returns
    /// The number of tokens granted, between 0 and `count`.
    #[inline]
    pub fn acquire_at(&mut self, now: TimeUnits, count: Tokens) -> Tokens {
        if count <= 0 {
            return 0;
        }
        self.adjust(self.tick_at(now));

        let granted = count.min(self.avail).max(0);
        self.avail -= granted;
        granted
    }

    /// Takes `count` tokens, reserving the ones that have not arrived yet.
    ///
    /// # Returns
    /// * `Some(0)` if the tokens were available and have been taken
    /// * `Some(wait)` if the tokens are reserved and the caller must wait
    ///   `wait` time units before using them
    /// * `None` if the wait would exceed `max_wait`; only the refill is kept
    #[inline]
    pub fn try_acquire_at(&mut self, now: TimeUnits, count: Tokens, max_wait: TimeUnits) -> Option<TimeUnits> {
        if count <= 0 {
            return Some(0);
        }
        let tick = self.tick_at(now);
        self.adjust(tick);

        let remaining = self.avail.saturating_sub(count);
        if remaining >= 0 {
            self.avail = remaining;
            return Some(0);
        }

        // Tick at which the deficit is covered; `remaining` may have
        // saturated at i64::MIN, so the deficit is taken from `count`
        let deficit = count.saturating_sub(self.avail);
        let end_tick = tick.saturating_add(ceil_div(deficit, self.quantum));
        let end_time = self
            .start
            .saturating_add(end_tick.saturating_mul(self.fill_interval));
        let wait = end_time.saturating_sub(now);
        if wait > max_wait {
            return None;
        }

        self.avail = remaining;
        Some(wait)
    }

    /// Returns the available count at `now`.
    ///
    /// The refill is written back even though nothing is taken.
    #[inline]
    pub fn available_at(&mut self, now: TimeUnits) -> Tokens {
        self.adjust(self.tick_at(now));
        self.avail
    }

    /// Catches `avail` up to `tick`.
    ///
    /// A saturated bucket only moves `latest_tick`: refilling would be clamped
    /// away anyway, and leaving `latest_tick` behind would credit the skipped
    /// ticks again once tokens are taken.
    #[inline]
    fn adjust(&mut self, tick: Tick) {
        if self.avail < self.capacity {
            let refilled = (tick - self.latest_tick).saturating_mul(self.quantum);
            self.avail = self.avail.saturating_add(refilled).min(self.capacity);
        }
        self.latest_tick = tick;
    }
}

#[inline]
fn ceil_div(numerator: i64, denominator: i64) -> i64 {
    numerator
        .saturating_add(denominator - 1)
        / denominator
}
