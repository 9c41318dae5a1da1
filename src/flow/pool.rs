//! # Worker Pool Backend
//!
//! A thread-based [`ExecutionBackend`] so the controller is usable without
//! bringing your own executor.
//!
//! ## Architecture
//!
//! ```text
//!     submit_now ─────────────────────────────┐
//!                                             ▼
//!     submit_after ──► ┌────────────┐    ┌──────────┐    ┌──────────┐
//!                      │ timer      │──► │  job     │──► │ worker 0 │
//!                      │ (min-heap  │    │  channel │    ├──────────┤
//!                      │  deadline) │    │          │──► │ worker 1 │
//!                      └────────────┘    └──────────┘    └──────────┘
//! ```
//!
//! The timer thread sleeps on its channel with `recv_timeout` until either a
//! new delayed job arrives or the earliest deadline passes.
//!
//! ## Shutdown
//!
//! [`WorkerPool::stop`] only closes the submission side. Work accepted
//! before that point still runs: the timer releases its remaining jobs at
//! their deadlines, the workers drain the job channel, then every thread
//! exits. [`WorkerPool::join`] waits for that to happen.

use super::backend::{ExecutionBackend, Task};
use super::error::FlowError;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Worker threads started when none are configured.
pub const DEFAULT_WORKERS: usize = 2;

/// Prefix for worker and timer thread names.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "flowgate";

/// Settings for a [`WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    /// Number of worker threads. Zero is raised to one.
    pub workers: usize,

    /// Thread names are `{prefix}-worker-{n}` and `{prefix}-timer`.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of worker threads.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the thread name prefix.
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    fn normalized(mut self) -> Self {
        self.workers = self.workers.max(1);
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
        self
    }
}

/// Counters describing what the pool has done so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Tasks that ran to completion, successfully or not.
    pub executed: u64,
    /// Tasks that returned an error or panicked.
    pub failed: u64,
    /// Delayed tasks still waiting for their deadline.
    pub pending_delayed: usize,
}

#[derive(Debug, Default)]
struct PoolCounters {
    executed: AtomicU64,
    failed: AtomicU64,
    pending_delayed: AtomicUsize,
}

struct Job<P> {
    task: Task<P>,
    payload: P,
}

struct DelayedJob<P> {
    deadline: Instant,
    seq: u64,
    job: Job<P>,
}

// Reversed so that BinaryHeap pops the earliest deadline first, FIFO on ties.
impl<P> Ord for DelayedJob<P> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<P> PartialOrd for DelayedJob<P> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<P> PartialEq for DelayedJob<P> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<P> Eq for DelayedJob<P> {}

/// Fixed-size thread pool with a delay timer.
///
/// ## Example
///
/// ```rust
/// use flowgate::{ExecutionBackend, WorkerPool, WorkerPoolConfig};
/// use std::time::Duration;
///
/// let pool = WorkerPool::new(WorkerPoolConfig::new().with_workers(2)).unwrap();
///
/// pool.submit_now(Box::new(|n: u32| { assert_eq!(n, 1); Ok(()) }), 1).unwrap();
/// pool.submit_after(Box::new(|_n: u32| Ok(())), 2, Duration::from_millis(20)).unwrap();
///
/// pool.stop();
/// pool.join();
/// assert_eq!(pool.stats().executed, 2);
/// ```
pub struct WorkerPool<P> {
    job_tx: Mutex<Option<mpsc::Sender<Job<P>>>>,
    delayed_tx: Mutex<Option<mpsc::Sender<DelayedJob<P>>>>,
    handles: Mutex<Vec<thread::JoinHandle<()>>>,
    counters: Arc<PoolCounters>,
    next_seq: AtomicU64,
    closed: AtomicBool,
    config: WorkerPoolConfig,
}

impl<P: Send + 'static> WorkerPool<P> {
    /// Starts the worker and timer threads.
    ///
    /// # Errors
    ///
    /// Returns [`FlowError::WorkerSpawn`] if a thread cannot be started.
    /// Threads started before the failure wind down on their own.
    pub fn new(config: WorkerPoolConfig) -> Result<Self, FlowError> {
        let config = config.normalized();
        let counters = Arc::new(PoolCounters::default());

        let (job_tx, job_rx) = mpsc::channel::<Job<P>>();
        let (delayed_tx, delayed_rx) = mpsc::channel::<DelayedJob<P>>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        let mut handles = Vec::with_capacity(config.workers + 1);

        for index in 0..config.workers {
            let rx = job_rx.clone();
            let counters = counters.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", config.thread_name_prefix, index))
                .spawn(move || worker_loop(index, rx, counters))
                .map_err(|e| FlowError::WorkerSpawn {
                    reason: e.to_string(),
                })?;
            handles.push(handle);
        }

        let timer_job_tx = job_tx.clone();
        let timer_counters = counters.clone();
        let handle = thread::Builder::new()
            .name(format!("{}-timer", config.thread_name_prefix))
            .spawn(move || timer_loop(delayed_rx, timer_job_tx, timer_counters))
            .map_err(|e| FlowError::WorkerSpawn {
                reason: e.to_string(),
            })?;
        handles.push(handle);

        info!(
            "Started worker pool ({} workers, prefix: {})",
            config.workers, config.thread_name_prefix
        );

        Ok(Self {
            job_tx: Mutex::new(Some(job_tx)),
            delayed_tx: Mutex::new(Some(delayed_tx)),
            handles: Mutex::new(handles),
            counters,
            next_seq: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            config,
        })
    }

    /// Starts a pool with the default configuration.
    pub fn with_defaults() -> Result<Self, FlowError> {
        Self::new(WorkerPoolConfig::default())
    }
}

impl<P> WorkerPool<P> {
    /// Returns true once [`stop`](ExecutionBackend::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.config.workers
    }

    /// Snapshot of the pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            executed: self.counters.executed.load(Ordering::Acquire),
            failed: self.counters.failed.load(Ordering::Acquire),
            pending_delayed: self.counters.pending_delayed.load(Ordering::Acquire),
        }
    }

    /// Blocks until every pool thread has exited.
    ///
    /// Threads only exit after the pool is stopped and all accepted work has
    /// run, so call `stop` first. Must not be called from inside a task.
    pub fn join(&self) {
        let handles = std::mem::take(&mut *lock(&self.handles));
        for handle in handles {
            let name = handle.thread().name().unwrap_or("unnamed").to_string();
            if handle.join().is_err() {
                warn!("Pool thread {} exited abnormally", name);
            }
        }
    }

    fn closed_error() -> FlowError {
        FlowError::submission_failed("worker pool is stopped")
    }
}

impl<P: Send + 'static> ExecutionBackend<P> for WorkerPool<P> {
    fn submit_now(&self, task: Task<P>, payload: P) -> Result<(), FlowError> {
        if self.is_stopped() {
            return Err(Self::closed_error());
        }

        let guard = lock(&self.job_tx);
        let tx = guard.as_ref().ok_or_else(Self::closed_error)?;
        tx.send(Job { task, payload })
            .map_err(|_| FlowError::submission_failed("worker threads have exited"))
    }

    fn submit_after(&self, task: Task<P>, payload: P, delay: Duration) -> Result<(), FlowError> {
        if delay.is_zero() {
            return self.submit_now(task, payload);
        }
        if self.is_stopped() {
            return Err(Self::closed_error());
        }

        let deadline = Instant::now()
            .checked_add(delay)
            .ok_or_else(|| FlowError::submission_failed(format!("delay {delay:?} is out of range")))?;

        let guard = lock(&self.delayed_tx);
        let tx = guard.as_ref().ok_or_else(Self::closed_error)?;

        let job = DelayedJob {
            deadline,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            job: Job { task, payload },
        };

        self.counters.pending_delayed.fetch_add(1, Ordering::AcqRel);
        tx.send(job).map_err(|_| {
            self.counters.pending_delayed.fetch_sub(1, Ordering::AcqRel);
            FlowError::submission_failed("timer thread has exited")
        })
    }

    fn stop(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the senders lets the threads drain and exit.
        lock(&self.job_tx).take();
        lock(&self.delayed_tx).take();

        info!(
            "Worker pool stopping ({} delayed jobs pending)",
            self.counters.pending_delayed.load(Ordering::Acquire)
        );
    }
}

impl<P> Drop for WorkerPool<P> {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!("Worker pool dropped without stop, closing submission");
        }
        lock(&self.job_tx).take();
        lock(&self.delayed_tx).take();
    }
}

impl<P> fmt::Debug for WorkerPool<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.config.workers)
            .field("stopped", &self.is_stopped())
            .field("stats", &self.stats())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn worker_loop<P>(index: usize, rx: Arc<Mutex<mpsc::Receiver<Job<P>>>>, counters: Arc<PoolCounters>) {
    debug!("Worker {} started", index);

    loop {
        // The guard is dropped before the job runs.
        let next = lock(&rx).recv();
        match next {
            Ok(job) => run_job(job, &counters),
            Err(_) => break,
        }
    }

    debug!("Worker {} exiting", index);
}

fn run_job<P>(job: Job<P>, counters: &PoolCounters) {
    let Job { task, payload } = job;

    let outcome = panic::catch_unwind(AssertUnwindSafe(move || task(payload)));
    counters.executed.fetch_add(1, Ordering::AcqRel);

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            counters.failed.fetch_add(1, Ordering::AcqRel);
            warn!(error = %e, "Task failed");
        }
        Err(_) => {
            counters.failed.fetch_add(1, Ordering::AcqRel);
            error!("Task panicked");
        }
    }
}

fn timer_loop<P>(
    rx: mpsc::Receiver<DelayedJob<P>>,
    job_tx: mpsc::Sender<Job<P>>,
    counters: Arc<PoolCounters>,
) {
    debug!("Timer thread started");

    let mut heap: BinaryHeap<DelayedJob<P>> = BinaryHeap::new();
    let mut accepting = true;

    loop {
        let now = Instant::now();
        while heap.peek().map_or(false, |next| next.deadline <= now) {
            if let Some(due) = heap.pop() {
                counters.pending_delayed.fetch_sub(1, Ordering::AcqRel);
                if job_tx.send(due.job).is_err() {
                    warn!("Workers gone, dropping {} delayed jobs", heap.len());
                    return;
                }
            }
        }

        let wait = heap
            .peek()
            .map(|next| next.deadline.saturating_duration_since(Instant::now()));

        if accepting {
            let received = match wait {
                Some(timeout) => rx.recv_timeout(timeout),
                None => rx.recv().map_err(|_| mpsc::RecvTimeoutError::Disconnected),
            };
            match received {
                Ok(job) => heap.push(job),
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    debug!("Timer input closed with {} jobs pending", heap.len());
                    accepting = false;
                }
            }
        } else {
            match wait {
                Some(timeout) => thread::sleep(timeout),
                None => break,
            }
        }
    }

    debug!("Timer thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn pool(workers: usize) -> WorkerPool<u32> {
        WorkerPool::new(WorkerPoolConfig::new().with_workers(workers)).unwrap()
    }

    #[test]
    fn test_runs_immediate_jobs() {
        let pool = pool(2);
        let sum = Arc::new(AtomicUsize::new(0));

        for n in 1..=10 {
            let sum = sum.clone();
            pool.submit_now(
                Box::new(move |v: u32| {
                    sum.fetch_add(v as usize, Ordering::SeqCst);
                    Ok(())
                }),
                n,
            )
            .unwrap();
        }

        pool.stop();
        pool.join();

        assert_eq!(sum.load(Ordering::SeqCst), 55);
        assert_eq!(pool.stats().executed, 10);
        assert_eq!(pool.stats().failed, 0);
    }

    #[test]
    fn test_delayed_job_waits() {
        let pool = pool(1);
        let started = Instant::now();
        let ran_at = Arc::new(Mutex::new(None));

        let slot = ran_at.clone();
        pool.submit_after(
            Box::new(move |_| {
                *slot.lock().unwrap() = Some(Instant::now());
                Ok(())
            }),
            0,
            Duration::from_millis(150),
        )
        .unwrap();
        assert_eq!(pool.stats().pending_delayed, 1);

        pool.stop();
        pool.join();

        let ran_at = ran_at.lock().unwrap().expect("delayed job should run");
        assert!(ran_at.duration_since(started) >= Duration::from_millis(150));
        assert_eq!(pool.stats().pending_delayed, 0);
    }

    #[test]
    fn test_delayed_jobs_run_in_deadline_order() {
        let pool = pool(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        for (id, delay_ms) in [(3_u32, 90_u64), (1, 30), (2, 60)] {
            let order = order.clone();
            pool.submit_after(
                Box::new(move |v| {
                    order.lock().unwrap().push(v);
                    Ok(())
                }),
                id,
                Duration::from_millis(delay_ms),
            )
            .unwrap();
        }

        pool.stop();
        pool.join();

        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_rejects_after_stop() {
        let pool = pool(1);
        pool.stop();

        let err = pool.submit_now(Box::new(|_| Ok(())), 1).unwrap_err();
        assert!(matches!(err, FlowError::SubmissionFailed { .. }));

        let err = pool
            .submit_after(Box::new(|_| Ok(())), 1, Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, FlowError::SubmissionFailed { .. }));

        pool.join();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let pool = pool(1);
        pool.stop();
        pool.stop();
        assert!(pool.is_stopped());
        pool.join();
        // A second join has nothing left to wait for.
        pool.join();
    }

    #[test]
    fn test_failures_and_panics_are_contained() {
        let pool = pool(1);

        pool.submit_now(Box::new(|_| Err("nope".into())), 1).unwrap();
        pool.submit_now(Box::new(|_| panic!("task blew up")), 2).unwrap();
        pool.submit_now(Box::new(|_| Ok(())), 3).unwrap();

        pool.stop();
        pool.join();

        let stats = pool.stats();
        assert_eq!(stats.executed, 3);
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn test_zero_workers_normalized() {
        let pool = pool(0);
        assert_eq!(pool.workers(), 1);
        pool.stop();
        pool.join();
    }

    #[test]
    fn test_zero_delay_runs_immediately() {
        let pool = pool(1);
        pool.submit_after(Box::new(|_| Ok(())), 1, Duration::ZERO)
            .unwrap();
        assert_eq!(pool.stats().pending_delayed, 0);
        pool.stop();
        pool.join();
        assert_eq!(pool.stats().executed, 1);
    }

    #[test]
    fn test_delayed_job_ordering_ties_are_fifo() {
        let deadline = Instant::now();
        let mut heap = BinaryHeap::new();
        for seq in [2_u64, 0, 1] {
            heap.push(DelayedJob {
                deadline,
                seq,
                job: Job {
                    task: Box::new(|_: u32| Ok(())),
                    payload: 0,
                },
            });
        }
        let popped: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|d| d.seq)).collect();
        assert_eq!(popped, vec![0, 1, 2]);
    }
}
