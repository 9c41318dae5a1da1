//! # Flow Module
//!
//! Internal implementation of admission control. Each submodule owns one
//! concern; everything public is re-exported from the crate root.
//!
//! ## Module Structure
//!
//! ```text
//!     flow/
//!     ├── mod.rs          (You are here - Module organization)
//!     ├── backend.rs      (Execution backend contract)
//!     ├── config.rs       (Estimator and controller settings)
//!     ├── controller.rs   (Admission controller and shutdown)
//!     ├── error.rs        (FlowError and task result types)
//!     ├── estimator.rs    (Token bucket and null estimator)
//!     ├── metrics.rs      (Admission counters)
//!     ├── observer.rs     (Delay notifications)
//!     ├── pool.rs         (Reference worker pool backend)
//!     └── utils.rs        (Clock, rounding, CPU helpers)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     Caller
//!       │ submit(task, payload)
//!       ▼
//!     ┌────────────┐   next_available()   ┌───────────┐
//!     │ Controller │ ───────────────────► │ Estimator │
//!     └─────┬──────┘                      └───────────┘
//!           │ delay > 0 ──► Observer
//!           ▼
//!     ┌────────────┐
//!     │  Backend   │ ◄── submit_now / submit_after
//!     └────────────┘
//! ```

mod backend;
mod config;
mod controller;
mod error;
mod estimator;
mod metrics;
mod observer;
mod pool;
mod utils;

pub use backend::{ExecutionBackend, Task};
pub use config::{
    ControllerConfig, EstimatorConfig, MemoryOrdering, DEFAULT_BURST, DEFAULT_RATE, DEFAULT_TICK,
    INFINITE_RATE,
};
pub use controller::{ControllerState, FlowController};
pub use error::{FlowError, TaskError, TaskResult};
pub use estimator::{BucketState, NullEstimator, RateEstimator, TokenBucket};
pub use metrics::FlowMetrics;
pub use observer::{LoggingObserver, NoopObserver, Observer};
pub use pool::{PoolStats, WorkerPool, WorkerPoolConfig, DEFAULT_THREAD_NAME_PREFIX, DEFAULT_WORKERS};
pub use utils::{cpu_relax, monotonic_ns, round_up_to_tick, CACHE_LINE_SIZE};
