//! # Utility Functions (utils.rs)
//!
//! Clock, spinning and rounding helpers shared by the bucket and the controller.
//!
//! ## Crate Clock
//!
//! ```text
//!     process start                         now
//!          │◄──────── monotonic_ns() ────────►│
//!          ▼                                  ▼
//!     ─────┼──────────────────────────────────┼────►  Instant timeline
//!        CLOCK_BASE
//! ```
//!
//! Every bucket measures time on the same monotonic timeline, so wall-clock
//! jumps never hand out extra tokens.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

// Monotonic time base captured on first use.
static CLOCK_BASE: OnceLock<Instant> = OnceLock::new();

/// Cache line size for x86_64 processors (Intel/AMD).
#[cfg(target_arch = "x86_64")]
pub const CACHE_LINE_SIZE: usize = 64;

/// Cache line size for ARM64 processors.
#[cfg(target_arch = "aarch64")]
pub const CACHE_LINE_SIZE: usize = 128;

/// Default cache line size for other architectures.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub const CACHE_LINE_SIZE: usize = 64;

/// CPU-specific relaxation hint for spin loops.
///
/// - **x86_64**: PAUSE
/// - **ARM64**: YIELD
/// - **Others**: standard spin loop hint
#[inline(always)]
pub fn cpu_relax() {
    std::hint::spin_loop();
}

/// Returns nanoseconds elapsed on the crate's monotonic clock.
///
/// The origin is the first call in the process. Values are only meaningful
/// relative to each other, which is all the token bucket needs.
///
/// # Example
///
/// ```rust
/// use flowgate::monotonic_ns;
///
/// let a = monotonic_ns();
/// let b = monotonic_ns();
/// assert!(b >= a);
/// ```
#[inline(always)]
pub fn monotonic_ns() -> u64 {
    let base = CLOCK_BASE.get_or_init(Instant::now);
    u64::try_from(base.elapsed().as_nanos()).unwrap_or(u64::MAX)
}

/// Converts a point on the crate clock back into an `Instant`.
pub(crate) fn instant_at(ns: u64) -> Instant {
    let base = *CLOCK_BASE.get_or_init(Instant::now);
    base + Duration::from_nanos(ns)
}

/// Rounds `delay` up to the next multiple of `tick`.
///
/// A zero `tick` disables rounding. Zero stays zero, so "admit now" is
/// never turned into a wait.
///
/// ```text
///     tick = 100ms
///
///     0ms ──► 0ms      1ns ──► 100ms
///     99ms ─► 100ms    100ms ─► 100ms    101ms ─► 200ms
/// ```
///
/// # Example
///
/// ```rust
/// use flowgate::round_up_to_tick;
/// use std::time::Duration;
///
/// let tick = Duration::from_millis(100);
/// assert_eq!(round_up_to_tick(Duration::ZERO, tick), Duration::ZERO);
/// assert_eq!(round_up_to_tick(Duration::from_millis(99), tick), tick);
/// assert_eq!(round_up_to_tick(Duration::from_millis(101), tick), tick * 2);
/// ```
pub fn round_up_to_tick(delay: Duration, tick: Duration) -> Duration {
    if delay.is_zero() || tick.is_zero() {
        return delay;
    }

    let tick_ns = tick.as_nanos();
    let delay_ns = delay.as_nanos();
    let ticks = delay_ns / tick_ns + u128::from(delay_ns % tick_ns != 0);
    let rounded = ticks.saturating_mul(tick_ns);

    // Saturate instead of wrapping for absurd delays.
    match u64::try_from(rounded) {
        Ok(ns) => Duration::from_nanos(ns),
        Err(_) => Duration::MAX,
    }
}

/// Cache-aligned wrapper for values to prevent false sharing.
///
/// ```text
///     Without alignment:  │ bucket mark │ neighbour │  ← same cache line
///     With alignment:     │ bucket mark ·········· │  ← own cache line
/// ```
#[cfg(target_arch = "x86_64")]
#[repr(C, align(64))]
pub(crate) struct CacheAligned<T>(pub(crate) T);
#[cfg(target_arch = "aarch64")]
#[repr(C, align(128))]
pub(crate) struct CacheAligned<T>(pub(crate) T);
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[repr(C, align(64))]
pub(crate) struct CacheAligned<T>(pub(crate) T);

impl<T> CacheAligned<T> {
    #[inline(always)]
    pub(crate) const fn new(value: T) -> Self {
        Self(value)
    }

    #[inline(always)]
    pub(crate) fn get(&self) -> &T {
        &self.0
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for CacheAligned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Exponential backoff helper for CAS retry loops.
///
/// ```text
///     Attempt 1: spin 1     Attempt 3: spin 4
///     Attempt 2: spin 2     Attempt 4: spin 8
///     Attempt 5+: yield to scheduler
/// ```
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    step: u32,
    max_step: u32,
}

impl Backoff {
    pub(crate) fn new(max_step: u32) -> Self {
        Self { step: 0, max_step }
    }

    #[inline]
    pub(crate) fn backoff(&mut self) {
        if self.step < 4 {
            for _ in 0..(1 << self.step) {
                cpu_relax();
            }
        } else {
            std::thread::yield_now();
        }
        self.step = (self.step + 1).min(self.max_step);
    }

    #[inline]
    pub(crate) fn is_at_max(&self) -> bool {
        self.step >= self.max_step
    }
}
