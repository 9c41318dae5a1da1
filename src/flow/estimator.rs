//! # Rate Estimators
//!
//! A rate estimator answers one question: how long must the caller wait
//! before its next unit of work may run? [`TokenBucket`] answers it with a
//! continuous token bucket; [`NullEstimator`] always answers "not at all".
//!
//! ## The Continuous Token Bucket
//!
//! The bucket keeps a single time mark: the instant at which it would hold
//! exactly zero tokens. Everything else is derived from it.
//!
//! ```text
//!     tokens(now) = clamp((now - zero_mark) / interval, 0, burst)
//!
//!                 zero_mark            now
//!     ───────────────┼──────────────────┼────────►
//!                    │◄── 2.4 tokens ──►│          admit now, mark += interval
//!
//!                                 now  zero_mark
//!     ──────────────────────────────┼─────┼──────►
//!                                   │◄───►│        backlog: a reserved token
//!                                                  caller waits (mark + interval - now)
//! ```
//!
//! Consuming a token, replenishing, capping at the burst and reserving a
//! future token are one compare-and-swap on that mark, so concurrent callers
//! receive strictly increasing admission times spaced by `1 / rate` and the
//! visible token count never leaves `[0, burst]`.

use super::config::{EstimatorConfig, MemoryOrdering};
use super::utils::{instant_at, monotonic_ns, Backoff, CacheAligned};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Backoff steps before the CAS loop starts yielding on every retry.
const MAX_BACKOFF_STEP: u32 = 6;

/// Computes the wait before the next unit of work may run.
///
/// Implementations must be callable from any number of threads at once,
/// must not block beyond a short critical section and must not fail.
pub trait RateEstimator: Send + Sync + fmt::Debug {
    /// Returns how long the caller should wait. Zero means "admit now".
    ///
    /// A positive answer reserves the slot: the next caller is told to wait
    /// longer.
    fn next_available(&self) -> Duration;
}

/// Estimator that never delays anything.
///
/// ```rust
/// use flowgate::{NullEstimator, RateEstimator};
/// use std::time::Duration;
///
/// let estimator = NullEstimator::new();
/// assert_eq!(estimator.next_available(), Duration::ZERO);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEstimator;

impl NullEstimator {
    /// Creates a null estimator.
    pub fn new() -> Self {
        Self
    }
}

impl RateEstimator for NullEstimator {
    #[inline(always)]
    fn next_available(&self) -> Duration {
        Duration::ZERO
    }
}

/// Point-in-time view of a [`TokenBucket`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Maximum number of tokens the bucket holds.
    pub capacity_tokens: f64,
    /// Tokens added per second.
    pub refill_rate_per_second: f64,
    /// When the bucket was last consulted.
    pub last_observation: Instant,
    /// Tokens available right now, always within `[0, capacity_tokens]`.
    pub current_tokens: f64,
}

/// Lock-free continuous token bucket.
///
/// ## Example
///
/// ```rust
/// use flowgate::{EstimatorConfig, RateEstimator, TokenBucket};
/// use std::time::Duration;
///
/// // 2 per second, no bursting
/// let bucket = TokenBucket::new(EstimatorConfig::new().with_rate(2.0).with_burst(1));
///
/// assert_eq!(bucket.next_available(), Duration::ZERO);
/// // The next token is half a second away and is now reserved
/// let wait = bucket.next_available();
/// assert!(wait > Duration::from_millis(400) && wait <= Duration::from_millis(500));
/// ```
pub struct TokenBucket {
    /// Crate-clock nanoseconds at which the bucket holds zero tokens.
    zero_mark: CacheAligned<AtomicI64>,

    /// Crate-clock nanoseconds of the latest observation.
    last_observation_ns: AtomicU64,

    /// Nanoseconds between two tokens.
    interval_ns: i64,

    /// Nanoseconds needed to refill the whole bucket.
    burst_span_ns: i64,

    rate: f64,
    burst: i64,
    unlimited: bool,
    ordering: MemoryOrdering,
}

impl TokenBucket {
    /// Builds a bucket from `config`, normalizing it first.
    ///
    /// The bucket starts full.
    pub fn new(config: EstimatorConfig) -> Self {
        let config = config.normalized();
        let unlimited = config.is_unlimited();

        let interval_ns = if unlimited {
            0
        } else {
            // Rates above one per nanosecond collapse to one per nanosecond.
            let ns = (1e9 / config.rate).round();
            if ns >= i64::MAX as f64 {
                i64::MAX
            } else {
                (ns as i64).max(1)
            }
        };
        let burst_span_ns = interval_ns.saturating_mul(config.burst);

        let now_ns = monotonic_ns();
        let now = clamp_ns(now_ns);

        Self {
            zero_mark: CacheAligned::new(AtomicI64::new(now.saturating_sub(burst_span_ns))),
            last_observation_ns: AtomicU64::new(now_ns),
            interval_ns,
            burst_span_ns,
            rate: config.rate,
            burst: config.burst,
            unlimited,
            ordering: config.ordering,
        }
    }

    /// Shorthand for a bucket with `rate` tokens/second and capacity `burst`.
    pub fn per_second(rate: f64, burst: i64) -> Self {
        Self::new(EstimatorConfig::new().with_rate(rate).with_burst(burst))
    }

    /// Configured refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Configured capacity.
    pub fn burst(&self) -> i64 {
        self.burst
    }

    /// True when the bucket was built with the infinite rate sentinel.
    pub fn is_unlimited(&self) -> bool {
        self.unlimited
    }

    /// Deterministic variant of [`RateEstimator::next_available`].
    ///
    /// `now_ns` is a reading of [`monotonic_ns`](crate::monotonic_ns).
    /// Useful for testing.
    pub fn next_available_at(&self, now_ns: u64) -> Duration {
        if self.unlimited {
            return Duration::ZERO;
        }

        self.last_observation_ns.fetch_max(now_ns, Ordering::Relaxed);

        let now = clamp_ns(now_ns);
        // A bucket idle for longer than this is simply full.
        let full_mark = now.saturating_sub(self.burst_span_ns);

        let mut backoff = Backoff::new(MAX_BACKOFF_STEP);
        let mut contended = false;
        let mut current = self.zero_mark.get().load(self.ordering.load());

        loop {
            let next = current.max(full_mark).saturating_add(self.interval_ns);

            match self.zero_mark.get().compare_exchange_weak(
                current,
                next,
                self.ordering.rmw(),
                self.ordering.cas_failure(),
            ) {
                Ok(_) => {
                    let wait = next.saturating_sub(now);
                    return if wait > 0 {
                        Duration::from_nanos(wait as u64)
                    } else {
                        Duration::ZERO
                    };
                }
                Err(actual) => {
                    current = actual;
                    if backoff.is_at_max() && !contended {
                        contended = true;
                        debug!("Token bucket under heavy CAS contention");
                    }
                    backoff.backoff();
                }
            }
        }
    }

    /// How far into the future tokens are already reserved.
    ///
    /// Zero when the bucket holds at least part of a token.
    pub fn backlog(&self) -> Duration {
        if self.unlimited {
            return Duration::ZERO;
        }
        let now = clamp_ns(monotonic_ns());
        let mark = self.zero_mark.get().load(self.ordering.load());
        let ahead = mark.saturating_sub(now);
        if ahead > 0 {
            Duration::from_nanos(ahead as u64)
        } else {
            Duration::ZERO
        }
    }

    /// Snapshot of the bucket at the current instant.
    pub fn state(&self) -> BucketState {
        let now = clamp_ns(monotonic_ns());
        let capacity = self.burst as f64;

        let current_tokens = if self.unlimited {
            capacity
        } else {
            let mark = self.zero_mark.get().load(self.ordering.load());
            let elapsed = now.saturating_sub(mark) as f64;
            (elapsed / self.interval_ns as f64).clamp(0.0, capacity)
        };

        BucketState {
            capacity_tokens: capacity,
            refill_rate_per_second: self.rate,
            last_observation: instant_at(self.last_observation_ns.load(Ordering::Relaxed)),
            current_tokens,
        }
    }

    /// Refills the bucket to capacity and drops every reservation.
    pub fn reset(&self) {
        let now_ns = monotonic_ns();
        self.zero_mark.get().store(
            clamp_ns(now_ns).saturating_sub(self.burst_span_ns),
            self.ordering.store(),
        );
        self.last_observation_ns.store(now_ns, Ordering::Relaxed);
        debug!(rate = self.rate, burst = self.burst, "Token bucket reset");
    }
}

impl RateEstimator for TokenBucket {
    #[inline]
    fn next_available(&self) -> Duration {
        self.next_available_at(monotonic_ns())
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenBucket")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .field("unlimited", &self.unlimited)
            .field("backlog", &self.backlog())
            .finish()
    }
}

#[inline(always)]
fn clamp_ns(ns: u64) -> i64 {
    i64::try_from(ns).unwrap_or(i64::MAX)
}
