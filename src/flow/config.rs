//! # Flow Configuration
//!
//! Settings for the token bucket and the flow controller. Both are plain
//! builder structs; neither ever rejects a value. Anything out of range is
//! swapped for a documented default during normalization.
//!
//! ## Token Bucket Parameters
//!
//! ```text
//!     ┌──────────────────────────────┐
//!     │   burst (capacity)           │ ← largest batch admitted at once
//!     │   ┌─────────────────────┐    │
//!     │   │ ● ● ● ● ●           │    │ ← current tokens (fractional)
//!     │   └─────────────────────┘    │
//!     │   rate: 10 tokens / second   │ ← continuous refill
//!     └──────────────────────────────┘
//! ```
//!
//! ## Normalization
//!
//! ```text
//!     rate  <= 0 or NaN ──► DEFAULT_RATE  (10/s)
//!     burst <= 0        ──► DEFAULT_BURST (5)
//!     estimator missing ──► NullEstimator
//!     observer missing  ──► NoopObserver
//! ```

use super::estimator::{NullEstimator, RateEstimator};
use super::observer::{NoopObserver, Observer};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Rate used when the configured one is not strictly positive.
pub const DEFAULT_RATE: f64 = 10.0;

/// Burst used when the configured one is not strictly positive.
pub const DEFAULT_BURST: i64 = 5;

/// Rate sentinel that disables throttling altogether.
///
/// `f64::MAX` is treated the same way.
pub const INFINITE_RATE: f64 = f64::INFINITY;

/// Default granularity that computed delays are rounded up to.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Memory ordering strategy for the bucket's atomic operations.
///
/// ```text
///     Relaxed ──────► fastest, minimal guarantees
///     AcquireRelease ► balanced (default)
///     Sequential ───► strongest guarantees
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryOrdering {
    /// Relaxed ordering.
    Relaxed,
    /// Acquire on loads, release on stores (default).
    #[default]
    AcquireRelease,
    /// Sequential consistency everywhere.
    Sequential,
}

impl MemoryOrdering {
    #[inline(always)]
    pub(crate) fn load(&self) -> Ordering {
        match self {
            Self::Relaxed => Ordering::Relaxed,
            Self::AcquireRelease => Ordering::Acquire,
            Self::Sequential => Ordering::SeqCst,
        }
    }

    #[inline(always)]
    pub(crate) fn store(&self) -> Ordering {
        match self {
            Self::Relaxed => Ordering::Relaxed,
            Self::AcquireRelease => Ordering::Release,
            Self::Sequential => Ordering::SeqCst,
        }
    }

    #[inline(always)]
    pub(crate) fn rmw(&self) -> Ordering {
        match self {
            Self::Relaxed => Ordering::Relaxed,
            Self::AcquireRelease => Ordering::AcqRel,
            Self::Sequential => Ordering::SeqCst,
        }
    }

    #[inline(always)]
    pub(crate) fn cas_failure(&self) -> Ordering {
        match self {
            Self::Relaxed => Ordering::Relaxed,
            Self::AcquireRelease => Ordering::Acquire,
            Self::Sequential => Ordering::SeqCst,
        }
    }
}

/// Configuration for a [`TokenBucket`](crate::TokenBucket).
///
/// ## Examples
///
/// ```rust
/// use flowgate::{EstimatorConfig, DEFAULT_BURST, DEFAULT_RATE};
///
/// // 2 requests/second, no bursting
/// let config = EstimatorConfig::new().with_rate(2.0).with_burst(1);
/// assert_eq!(config.rate, 2.0);
///
/// // Out-of-range values fall back to the defaults
/// let config = EstimatorConfig::new().with_rate(-1.0).with_burst(0).normalized();
/// assert_eq!(config.rate, DEFAULT_RATE);
/// assert_eq!(config.burst, DEFAULT_BURST);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    /// Sustained rate in tokens per second.
    pub rate: f64,

    /// Bucket capacity, i.e. the largest batch admitted without delay.
    pub burst: i64,

    /// Memory ordering for the bucket's compare-and-swap loop.
    pub ordering: MemoryOrdering,
}

impl Default for EstimatorConfig {
    /// 10 tokens/second with a burst of 5.
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            burst: DEFAULT_BURST,
            ordering: MemoryOrdering::default(),
        }
    }
}

impl EstimatorConfig {
    /// Creates a configuration holding the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration with throttling disabled.
    pub fn unlimited() -> Self {
        Self::default().with_rate(INFINITE_RATE)
    }

    /// Sets the sustained rate (tokens per second).
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Sets the burst capacity.
    pub fn with_burst(mut self, burst: i64) -> Self {
        self.burst = burst;
        self
    }

    /// Sets the memory ordering strategy.
    pub fn with_ordering(mut self, ordering: MemoryOrdering) -> Self {
        self.ordering = ordering;
        self
    }

    /// Replaces out-of-range values with the defaults.
    ///
    /// Never fails. A NaN rate counts as out of range.
    pub fn normalized(mut self) -> Self {
        if self.rate.is_nan() || self.rate <= 0.0 {
            self.rate = DEFAULT_RATE;
        }
        if self.burst <= 0 {
            self.burst = DEFAULT_BURST;
        }
        self
    }

    /// Returns true if the rate is the infinite sentinel.
    pub fn is_unlimited(&self) -> bool {
        self.rate == INFINITE_RATE || self.rate == f64::MAX
    }

    /// Spacing between consecutive tokens at the configured rate.
    ///
    /// Zero for an unlimited or not-yet-normalized non-positive rate.
    ///
    /// ```rust
    /// use flowgate::EstimatorConfig;
    /// use std::time::Duration;
    ///
    /// let config = EstimatorConfig::new().with_rate(4.0);
    /// assert_eq!(config.token_interval(), Duration::from_millis(250));
    /// ```
    pub fn token_interval(&self) -> Duration {
        if self.is_unlimited() || self.rate.is_nan() || self.rate <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(1.0 / self.rate).unwrap_or(Duration::MAX)
        }
    }
}

/// Configuration for a [`FlowController`](crate::FlowController).
///
/// Every field is optional. Whatever is missing when the controller is built
/// is filled with the no-throttling defaults.
///
/// ```rust
/// use flowgate::{ControllerConfig, LoggingObserver, TokenBucket, EstimatorConfig};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let bucket = TokenBucket::new(EstimatorConfig::new().with_rate(10.0).with_burst(1));
/// let config: ControllerConfig<String> = ControllerConfig::new()
///     .with_estimator(Arc::new(bucket))
///     .with_observer(Arc::new(LoggingObserver))
///     .with_tick(Duration::from_millis(50));
/// assert!(config.has_estimator());
/// ```
pub struct ControllerConfig<P> {
    estimator: Option<Arc<dyn RateEstimator>>,
    observer: Option<Arc<dyn Observer<P>>>,
    tick: Duration,
}

impl<P> Default for ControllerConfig<P> {
    fn default() -> Self {
        Self {
            estimator: None,
            observer: None,
            tick: DEFAULT_TICK,
        }
    }
}

impl<P> ControllerConfig<P> {
    /// Creates an empty configuration (no throttling, no observer).
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the rate estimator.
    pub fn with_estimator(mut self, estimator: Arc<dyn RateEstimator>) -> Self {
        self.estimator = Some(estimator);
        self
    }

    /// Sets the observer notified about delayed admissions.
    pub fn with_observer(mut self, observer: Arc<dyn Observer<P>>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Sets the tick granularity delays are rounded up to.
    ///
    /// `Duration::ZERO` disables rounding.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Returns true if an estimator was supplied.
    pub fn has_estimator(&self) -> bool {
        self.estimator.is_some()
    }

    /// Returns true if an observer was supplied.
    pub fn has_observer(&self) -> bool {
        self.observer.is_some()
    }

    /// Configured tick granularity.
    pub fn tick(&self) -> Duration {
        self.tick
    }
}

impl<P: 'static> ControllerConfig<P> {
    /// Splits the configuration into its parts, filling in the defaults.
    pub(crate) fn into_parts(self) -> (Arc<dyn RateEstimator>, Arc<dyn Observer<P>>, Duration) {
        let estimator = self
            .estimator
            .unwrap_or_else(|| Arc::new(NullEstimator::new()));
        let observer = self.observer.unwrap_or_else(|| Arc::new(NoopObserver));
        (estimator, observer, self.tick)
    }
}

impl<P> fmt::Debug for ControllerConfig<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("estimator", &self.estimator)
            .field("has_observer", &self.observer.is_some())
            .field("tick", &self.tick)
            .finish()
    }
}
