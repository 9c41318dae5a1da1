//! # Flow Controller
//!
//! The admission controller. For every submission it asks the rate
//! estimator how long to wait, rounds that up to the tick, and hands the work
//! to the execution backend either right away or with a delay. It never
//! sleeps and never runs task bodies.
//!
//! ## Admission Flow
//!
//! ```text
//!     submit(task, payload)
//!          │
//!          ▼
//!     stopped? ──Yes──► Err(Stopped)
//!          │No
//!          ▼
//!     delay = round_up(estimator.next_available(), tick)
//!          │
//!     delay > 0? ──No──► backend.submit_now(task, payload)
//!          │Yes
//!          ▼
//!     observer.on_delayed(&payload, delay)
//!          │
//!          ▼
//!     backend.submit_after(task, payload, delay)
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//!     Running ──stop()──► Stopped     (once, irreversible)
//! ```
//!
//! Only the first `stop` call reaches the backend. Work the backend already
//! accepted is not cancelled.

use super::backend::{ExecutionBackend, Task};
use super::config::ControllerConfig;
use super::error::{FlowError, TaskResult};
use super::estimator::RateEstimator;
use super::metrics::{FlowCounters, FlowMetrics};
use super::observer::Observer;
use super::utils::round_up_to_tick;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

const RUNNING: u8 = 0;
const STOPPED: u8 = 1;

/// Lifecycle state of a [`FlowController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Accepting submissions.
    Running,
    /// Stopped for good.
    Stopped,
}

/// Paces work into an [`ExecutionBackend`].
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
///
/// ## Example
///
/// ```rust
/// use flowgate::{ControllerConfig, FlowController, TokenBucket, WorkerPool};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let pool = Arc::new(WorkerPool::<String>::with_defaults().unwrap());
/// let config = ControllerConfig::new()
///     .with_estimator(Arc::new(TokenBucket::per_second(10.0, 1)))
///     .with_observer(Arc::new(|msg: &String, delay: Duration| {
///         println!("{msg} delayed by {delay:?}");
///     }));
///
/// let controller = FlowController::new(pool.clone(), config);
/// for i in 0..3 {
///     controller
///         .submit(|msg: String| { println!("{msg}"); Ok(()) }, format!("job {i}"))
///         .unwrap();
/// }
///
/// controller.stop();
/// pool.join();
/// ```
pub struct FlowController<P> {
    estimator: Arc<dyn RateEstimator>,
    observer: Arc<dyn Observer<P>>,
    tick: Duration,
    backend: Arc<dyn ExecutionBackend<P>>,
    state: AtomicU8,
    counters: FlowCounters,
}

impl<P: Send + 'static> FlowController<P> {
    /// Builds a controller in front of `backend`.
    ///
    /// `config` may be `None`, in which case nothing is throttled and nobody
    /// is notified. Missing parts of a supplied config get the same defaults.
    pub fn new(
        backend: Arc<dyn ExecutionBackend<P>>,
        config: impl Into<Option<ControllerConfig<P>>>,
    ) -> Self {
        let (estimator, observer, tick) = config.into().unwrap_or_default().into_parts();

        debug!(?estimator, ?tick, "Flow controller created");

        Self {
            estimator,
            observer,
            tick,
            backend,
            state: AtomicU8::new(RUNNING),
            counters: FlowCounters::default(),
        }
    }

    /// Like [`new`](Self::new), for callers whose backend may be absent.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::InvalidBackend`] when `backend` is `None`; no
    /// controller is created.
    ///
    /// ```rust
    /// use flowgate::{ExecutionBackend, FlowController, FlowError};
    /// use std::sync::Arc;
    ///
    /// let missing: Option<Arc<dyn ExecutionBackend<u32>>> = None;
    /// let result = FlowController::try_new(missing, None);
    /// assert_eq!(result.unwrap_err(), FlowError::InvalidBackend);
    /// ```
    pub fn try_new(
        backend: Option<Arc<dyn ExecutionBackend<P>>>,
        config: impl Into<Option<ControllerConfig<P>>>,
    ) -> Result<Self, FlowError> {
        let backend = backend.ok_or(FlowError::InvalidBackend)?;
        Ok(Self::new(backend, config))
    }

    /// Submits `task(payload)`, delayed as far as the rate requires.
    ///
    /// Returns once the backend has accepted or refused the work; the task
    /// itself runs later and its result is never seen here.
    ///
    /// # Errors
    ///
    /// - [`FlowError::Stopped`] if the controller has been stopped.
    /// - Whatever error the backend reports for the submission.
    pub fn submit<F>(&self, task: F, payload: P) -> Result<(), FlowError>
    where
        F: FnOnce(P) -> TaskResult + Send + 'static,
    {
        self.submit_boxed(Box::new(task), payload)
    }

    /// [`submit`](Self::submit) for an already boxed task.
    pub fn submit_boxed(&self, task: Task<P>, payload: P) -> Result<(), FlowError> {
        if self.is_stopped() {
            self.counters.record_refused_stopped();
            return Err(FlowError::Stopped);
        }

        let delay = round_up_to_tick(self.estimator.next_available(), self.tick);

        let result = if delay > Duration::ZERO {
            trace!(delay_ms = delay.as_millis() as u64, "Admission delayed");
            self.observer.on_delayed(&payload, delay);
            self.backend
                .submit_after(task, payload, delay)
                .map(|()| self.counters.record_delayed(delay))
        } else {
            self.backend
                .submit_now(task, payload)
                .map(|()| self.counters.record_immediate())
        };

        if let Err(e) = &result {
            self.counters.record_rejected();
            debug!(error = %e, "Backend rejected submission");
        }

        result
    }
}

impl<P> FlowController<P> {
    /// Stops the controller and, the first time only, the backend.
    ///
    /// Safe to call from any number of threads; never blocks. Returns true
    /// for the call that performed the transition.
    pub fn stop(&self) -> bool {
        if self
            .state
            .compare_exchange(RUNNING, STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.backend.stop();
        info!("Flow controller stopped");
        true
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => ControllerState::Running,
            _ => ControllerState::Stopped,
        }
    }

    /// True once [`stop`](Self::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.state() == ControllerState::Stopped
    }

    /// Tick granularity delays are rounded up to.
    pub fn tick(&self) -> Duration {
        self.tick
    }

    /// The estimator in use (the configured one, or the null default).
    pub fn estimator(&self) -> &Arc<dyn RateEstimator> {
        &self.estimator
    }

    /// Snapshot of the admission counters.
    pub fn metrics(&self) -> FlowMetrics {
        self.counters.snapshot()
    }
}

impl<P> fmt::Debug for FlowController<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowController")
            .field("state", &self.state())
            .field("estimator", &self.estimator)
            .field("tick", &self.tick)
            .field("metrics", &self.metrics())
            .finish()
    }
}
