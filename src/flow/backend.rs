//! The contract between the flow controller and whatever runs the work.
//!
//! The controller never executes a task itself. It only chooses between
//! [`ExecutionBackend::submit_now`] and [`ExecutionBackend::submit_after`],
//! and calls [`ExecutionBackend::stop`] once when it shuts down.

use super::error::{FlowError, TaskResult};
use std::time::Duration;

/// A unit of work: a one-shot function applied to its payload.
pub type Task<P> = Box<dyn FnOnce(P) -> TaskResult + Send + 'static>;

/// Asynchronous executor the flow controller hands work to.
///
/// Implementations must accept work from many threads at once and run it
/// off the caller's thread. Ordering, batching and parallelism are up to the
/// implementation, as long as delayed work never starts before its delay has
/// elapsed.
pub trait ExecutionBackend<P>: Send + Sync {
    /// Accepts `task(payload)` for execution as soon as possible.
    fn submit_now(&self, task: Task<P>, payload: P) -> Result<(), FlowError>;

    /// Accepts `task(payload)` for execution no earlier than `delay` from now.
    fn submit_after(&self, task: Task<P>, payload: P, delay: Duration) -> Result<(), FlowError>;

    /// Releases the backend's resources. Later submissions may be rejected.
    fn stop(&self);
}
