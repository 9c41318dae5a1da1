//! # Flow Controller Metrics
//!
//! Counters kept by the controller for every submission, and a snapshot
//! type for reading them.
//!
//! ```text
//!     Flow Metrics:
//!     ┌─────────────────────────────────────┐
//!     │  Submitted: 100                     │
//!     │  ├─ Immediate: 60                   │
//!     │  ├─ Delayed:   38  (max 900ms)      │
//!     │  └─ Rejected:   2                   │
//!     │  Throttle ratio: 38%                │
//!     └─────────────────────────────────────┘
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters owned by a controller.
#[derive(Debug, Default)]
pub(crate) struct FlowCounters {
    immediate: AtomicU64,
    delayed: AtomicU64,
    rejected: AtomicU64,
    refused_stopped: AtomicU64,
    max_delay_ns: AtomicU64,
    total_delay_ns: AtomicU64,
}

impl FlowCounters {
    #[inline]
    pub(crate) fn record_immediate(&self) {
        self.immediate.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_delayed(&self, delay: Duration) {
        let ns = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        self.delayed.fetch_add(1, Ordering::Relaxed);
        self.total_delay_ns.fetch_add(ns, Ordering::Relaxed);
        self.max_delay_ns.fetch_max(ns, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_refused_stopped(&self) {
        self.refused_stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> FlowMetrics {
        FlowMetrics {
            admitted_immediately: self.immediate.load(Ordering::Relaxed),
            admitted_delayed: self.delayed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            refused_stopped: self.refused_stopped.load(Ordering::Relaxed),
            max_delay: Duration::from_nanos(self.max_delay_ns.load(Ordering::Relaxed)),
            total_delay: Duration::from_nanos(self.total_delay_ns.load(Ordering::Relaxed)),
        }
    }
}

/// Snapshot of a controller's admission decisions.
///
/// `admitted_immediately` and `admitted_delayed` count submissions the
/// backend accepted. `rejected` counts backend refusals, `refused_stopped`
/// counts submissions turned away because the controller was stopped.
///
/// ## Example
///
/// ```rust
/// use flowgate::{FlowController, WorkerPool};
/// use std::sync::Arc;
///
/// let pool = Arc::new(WorkerPool::<u32>::with_defaults().unwrap());
/// let controller = FlowController::new(pool, None);
/// controller.submit(|_| Ok(()), 1).unwrap();
///
/// let metrics = controller.metrics();
/// assert_eq!(metrics.total_submitted(), 1);
/// assert_eq!(metrics.throttle_ratio(), 0.0);
/// controller.stop();
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlowMetrics {
    /// Submissions handed to the backend without delay.
    pub admitted_immediately: u64,
    /// Submissions handed to the backend with a delay.
    pub admitted_delayed: u64,
    /// Submissions the backend refused.
    pub rejected: u64,
    /// Submissions refused because the controller was stopped.
    pub refused_stopped: u64,
    /// Longest delay applied so far.
    pub max_delay: Duration,
    /// Sum of all delays applied so far.
    pub total_delay: Duration,
}

impl FlowMetrics {
    /// Submissions the backend accepted.
    #[inline]
    pub fn total_admitted(&self) -> u64 {
        self.admitted_immediately + self.admitted_delayed
    }

    /// Every call to `submit`, whatever its outcome.
    #[inline]
    pub fn total_submitted(&self) -> u64 {
        self.total_admitted() + self.rejected + self.refused_stopped
    }

    /// Fraction of admitted submissions that were delayed (0.0 to 1.0).
    pub fn throttle_ratio(&self) -> f64 {
        let admitted = self.total_admitted();
        if admitted == 0 {
            0.0
        } else {
            self.admitted_delayed as f64 / admitted as f64
        }
    }

    /// Mean delay among delayed submissions.
    pub fn average_delay(&self) -> Duration {
        if self.admitted_delayed == 0 {
            Duration::ZERO
        } else {
            let avg = self.total_delay.as_nanos() / u128::from(self.admitted_delayed);
            Duration::from_nanos(u64::try_from(avg).unwrap_or(u64::MAX))
        }
    }

    /// True when more than half of the admitted work had to wait.
    pub fn is_throttling(&self) -> bool {
        self.throttle_ratio() > 0.5
    }

    /// Human-readable report.
    ///
    /// ```text
    /// FlowController Metrics:
    /// ├─ Admitted: 98
    /// │  ├─ Immediate: 60
    /// │  └─ Delayed: 38
    /// ├─ Rejected: 2
    /// ├─ Refused (stopped): 0
    /// └─ Delays:
    ///    ├─ Throttle Ratio: 38.78%
    ///    ├─ Average: 450.000ms
    ///    └─ Max: 900.000ms
    /// ```
    pub fn summary(&self) -> String {
        format!(
            "FlowController Metrics:\n\
             ├─ Admitted: {}\n\
             │  ├─ Immediate: {}\n\
             │  └─ Delayed: {}\n\
             ├─ Rejected: {}\n\
             ├─ Refused (stopped): {}\n\
             └─ Delays:\n\
             \u{20}  ├─ Throttle Ratio: {:.2}%\n\
             \u{20}  ├─ Average: {:.3}ms\n\
             \u{20}  └─ Max: {:.3}ms",
            self.total_admitted(),
            self.admitted_immediately,
            self.admitted_delayed,
            self.rejected,
            self.refused_stopped,
            self.throttle_ratio() * 100.0,
            self.average_delay().as_secs_f64() * 1000.0,
            self.max_delay.as_secs_f64() * 1000.0,
        )
    }
}

impl fmt::Display for FlowMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}
