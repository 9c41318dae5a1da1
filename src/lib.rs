//! # Flowgate - Non-Blocking Admission Control for Rust
//!
//! Flowgate sits between producers of work and whatever executes that work.
//! Every submission is checked against a rate ceiling: if there is budget
//! left the work is handed over at once, otherwise it is handed over with a
//! delay. Nothing is dropped and the submitting thread never sleeps.
//!
//! ## How Pacing Works
//!
//! A continuous token bucket answers one question per submission: "how long
//! until this caller may run?" Callers that arrive together are given
//! distinct, evenly spaced slots:
//!
//! ```text
//!     rate = 10/s, burst = 1, five submissions at t = 0
//!
//!     t(ms)   0    100   200   300   400
//!             │     │     │     │     │
//!     job 0 ──●     │     │     │     │     (now)
//!     job 1 ────────●     │     │     │     (after 100ms)
//!     job 2 ──────────────●     │     │     (after 200ms)
//!     job 3 ────────────────────●     │     (after 300ms)
//!     job 4 ──────────────────────────●     (after 400ms)
//! ```
//!
//! Delays are rounded up to a tick (100 ms by default), so a job never runs
//! earlier than the bucket allows.
//!
//! ## Quick Start
//!
//! ```rust
//! use flowgate::FlowControllerBuilder;
//! use std::time::Duration;
//!
//! let controller = FlowControllerBuilder::new()
//!     .rate(10.0)
//!     .burst(1)
//!     .on_delayed(|job: &u32, delay: Duration| {
//!         println!("job {job} limited for {delay:?}");
//!     })
//!     .build()
//!     .unwrap();
//!
//! for job in 0..3 {
//!     controller
//!         .submit(|job| { println!("running {job}"); Ok(()) }, job)
//!         .unwrap();
//! }
//!
//! controller.stop();
//! ```
//!
//! ## Bring Your Own Backend
//!
//! The controller only talks to an [`ExecutionBackend`]. [`WorkerPool`] is
//! the bundled one; anything implementing the trait works.
//!
//! ```rust
//! use flowgate::{ControllerConfig, FlowController, TokenBucket, WorkerPool, WorkerPoolConfig};
//! use std::sync::Arc;
//!
//! let pool = Arc::new(WorkerPool::<String>::new(WorkerPoolConfig::new().with_workers(4)).unwrap());
//! let config = ControllerConfig::new().with_estimator(Arc::new(TokenBucket::per_second(50.0, 10)));
//!
//! let controller = FlowController::new(pool.clone(), config);
//! controller.submit(|line| { println!("{line}"); Ok(()) }, "hello".to_string()).unwrap();
//!
//! controller.stop();
//! pool.join();
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   Your Application      │
//!                    └──────────┬──────────────┘
//!                               │ submit(task, payload)
//!                    ┌──────────▼──────────────┐
//!                    │    FlowController       │
//!                    ├─────────────────────────┤
//!                    │  • submit()             │
//!                    │  • stop()               │
//!                    │  • metrics()            │
//!                    └──────────┬──────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                              │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │   RateEstimator     │       │   ExecutionBackend   │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • TokenBucket       │       │ • WorkerPool         │
//!     │ • NullEstimator     │       │ • your own           │
//!     └─────────────────────┘       └──────────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! All public types are `Send + Sync` and meant to be shared via `Arc`.
//! [`FlowController::stop`] may be called from any number of threads; the
//! backend is stopped exactly once.
//!
//! ## Logging
//!
//! The crate emits `tracing` events and never installs a subscriber.
//!
//! ## Examples
//!
//! See the `demos/` directory:
//! - `standard.rs` - Worker pool, explicit config, ten concurrent producers
//! - `lazy.rs` - One-call construction with the builder

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_op_in_unsafe_fn)]

// Internal module
mod flow;

// Public re-exports
pub use flow::{
    cpu_relax, monotonic_ns, round_up_to_tick, BucketState, ControllerConfig, ControllerState,
    EstimatorConfig, ExecutionBackend, FlowController, FlowError, FlowMetrics, LoggingObserver,
    MemoryOrdering, NoopObserver, NullEstimator, Observer, PoolStats, RateEstimator, Task,
    TaskError, TaskResult, TokenBucket, WorkerPool, WorkerPoolConfig, CACHE_LINE_SIZE,
    DEFAULT_BURST, DEFAULT_RATE, DEFAULT_THREAD_NAME_PREFIX, DEFAULT_TICK, DEFAULT_WORKERS,
    INFINITE_RATE,
};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A flow controller wrapped in `Arc` for sharing between producer threads.
///
/// # Example
/// ```rust
/// use flowgate::{FlowController, SharedFlowController, WorkerPool};
/// use std::sync::Arc;
///
/// let pool = Arc::new(WorkerPool::<u64>::with_defaults().unwrap());
/// let shared: SharedFlowController<u64> = Arc::new(FlowController::new(pool, None));
///
/// let producer = shared.clone();
/// std::thread::spawn(move || {
///     producer.submit(|_| Ok(()), 42).unwrap();
/// })
/// .join()
/// .unwrap();
///
/// shared.stop();
/// ```
pub type SharedFlowController<P> = Arc<FlowController<P>>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use flowgate::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for typical admission control use cases.
    //!
    //! # Example
    //! ```rust
    //! use flowgate::prelude::*;
    //!
    //! let bucket = TokenBucket::new(EstimatorConfig::new().with_rate(20.0));
    //! let config: ControllerConfig<u32> = ControllerConfig::new();
    //! assert_eq!(bucket.rate(), 20.0);
    //! assert!(!config.has_estimator());
    //! ```

    pub use crate::{
        ControllerConfig, EstimatorConfig, ExecutionBackend, FlowController,
        FlowControllerBuilder, FlowError, FlowMetrics, NullEstimator, Observer, RateEstimator,
        SharedFlowController, TaskResult, TokenBucket, WorkerPool, WorkerPoolConfig,
    };
}

/// Builder that wires a token bucket, an observer and a [`WorkerPool`] into
/// a ready [`FlowController`].
///
/// Unset values fall back to the usual defaults: rate 10/s, burst 5, a
/// 100 ms tick and two worker threads. Invalid rate or burst values are
/// normalized the same way [`EstimatorConfig`] does.
///
/// # Example
///
/// ```rust
/// use flowgate::{FlowControllerBuilder, LoggingObserver};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let (controller, pool) = FlowControllerBuilder::<&'static str>::new()
///     .rate(2.0)
///     .burst(1)
///     .tick(Duration::from_millis(50))
///     .workers(1)
///     .observer(Arc::new(LoggingObserver))
///     .build_with_pool()
///     .unwrap();
///
/// controller.submit(|_| Ok(()), "first").unwrap();
/// controller.stop();
/// pool.join();
/// assert_eq!(pool.stats().executed, 1);
/// ```
pub struct FlowControllerBuilder<P> {
    estimator: EstimatorConfig,
    throttled: bool,
    tick: Duration,
    pool: WorkerPoolConfig,
    observer: Option<Arc<dyn Observer<P>>>,
}

impl<P> FlowControllerBuilder<P> {
    /// Creates a builder with default settings.
    pub fn new() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            throttled: true,
            tick: DEFAULT_TICK,
            pool: WorkerPoolConfig::default(),
            observer: None,
        }
    }

    /// Sustained rate in submissions per second.
    ///
    /// [`INFINITE_RATE`] turns throttling off.
    pub fn rate(mut self, rate: f64) -> Self {
        self.estimator.rate = rate;
        self
    }

    /// Number of submissions admitted back to back after an idle period.
    pub fn burst(mut self, burst: i64) -> Self {
        self.estimator.burst = burst;
        self
    }

    /// Granularity delays are rounded up to. Zero disables rounding.
    pub fn tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Worker threads in the pool created by [`build`](Self::build).
    pub fn workers(mut self, workers: usize) -> Self {
        self.pool.workers = workers;
        self
    }

    /// Prefix for the pool's thread names.
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.pool.thread_name_prefix = prefix.into();
        self
    }

    /// Memory ordering for the token bucket's atomics.
    pub fn memory_ordering(mut self, ordering: MemoryOrdering) -> Self {
        self.estimator.ordering = ordering;
        self
    }

    /// Observer notified of every delayed admission.
    pub fn observer(mut self, observer: Arc<dyn Observer<P>>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Disables throttling: the controller uses a [`NullEstimator`].
    pub fn unthrottled(mut self) -> Self {
        self.throttled = false;
        self
    }

    /// The pool settings [`build`](Self::build) will use.
    pub fn pool_config(&self) -> &WorkerPoolConfig {
        &self.pool
    }
}

impl<P: Send + 'static> FlowControllerBuilder<P> {
    /// Closure shorthand for [`observer`](Self::observer).
    pub fn on_delayed<F>(self, observer: F) -> Self
    where
        F: Fn(&P, Duration) + Send + Sync + 'static,
    {
        self.observer(Arc::new(observer))
    }

    /// Builds a controller in front of a new [`WorkerPool`].
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::WorkerSpawn`] if a pool thread cannot be started.
    pub fn build(self) -> Result<FlowController<P>, FlowError> {
        self.build_with_pool().map(|(controller, _)| controller)
    }

    /// Like [`build`](Self::build), also returning the pool so callers can
    /// [`join`](WorkerPool::join) it or read its stats.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::WorkerSpawn`] if a pool thread cannot be started.
    pub fn build_with_pool(self) -> Result<(FlowController<P>, Arc<WorkerPool<P>>), FlowError> {
        let pool = Arc::new(WorkerPool::new(self.pool.clone())?);
        let controller = self.build_with_backend(pool.clone());
        Ok((controller, pool))
    }

    /// Builds a controller in front of an existing backend.
    pub fn build_with_backend(self, backend: Arc<dyn ExecutionBackend<P>>) -> FlowController<P> {
        let estimator: Arc<dyn RateEstimator> = if self.throttled {
            Arc::new(TokenBucket::new(self.estimator))
        } else {
            Arc::new(NullEstimator::new())
        };

        let mut config = ControllerConfig::new()
            .with_estimator(estimator)
            .with_tick(self.tick);
        if let Some(observer) = self.observer {
            config = config.with_observer(observer);
        }

        FlowController::new(backend, config)
    }
}

impl<P> Default for FlowControllerBuilder<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> fmt::Debug for FlowControllerBuilder<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowControllerBuilder")
            .field("estimator", &self.estimator)
            .field("throttled", &self.throttled)
            .field("tick", &self.tick)
            .field("pool", &self.pool)
            .field("has_observer", &self.observer.is_some())
            .finish()
    }
}

/// One-call constructor: a throttled controller in front of a default
/// [`WorkerPool`].
///
/// `observer` may be `None`. Invalid `rate` or `burst` values fall back to
/// the defaults.
///
/// # Errors
///
/// Returns [`FlowError::WorkerSpawn`] if a pool thread cannot be started.
///
/// ```rust
/// let controller = flowgate::flow_controller::<u8>(5.0, 1, None).unwrap();
/// controller.submit(|_| Ok(()), 1).unwrap();
/// controller.stop();
/// ```
pub fn flow_controller<P: Send + 'static>(
    rate: f64,
    burst: i64,
    observer: Option<Arc<dyn Observer<P>>>,
) -> Result<FlowController<P>, FlowError> {
    let mut builder = FlowControllerBuilder::new().rate(rate).burst(burst);
    if let Some(observer) = observer {
        builder = builder.observer(observer);
    }
    builder.build()
}
