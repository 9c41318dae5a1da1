use flowgate::{
    ControllerConfig, ExecutionBackend, FlowController, FlowControllerBuilder, FlowError,
    NullEstimator, Observer, TokenBucket, WorkerPool, WorkerPoolConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_delayed_jobs_respect_pacing() {
    let (controller, pool) = FlowControllerBuilder::<u32>::new()
        .rate(10.0)
        .burst(1)
        .workers(2)
        .build_with_pool()
        .unwrap();

    let start = Instant::now();
    let (tx, rx) = mpsc::channel();

    for job in 0..5u32 {
        let tx = tx.clone();
        controller
            .submit(
                move |job| {
                    tx.send((job, start.elapsed())).unwrap();
                    Ok(())
                },
                job,
            )
            .unwrap();
    }
    drop(tx);

    controller.stop();
    pool.join();

    let mut runs: Vec<(u32, Duration)> = rx.iter().collect();
    runs.sort_by_key(|(job, _)| *job);
    assert_eq!(runs.len(), 5);

    // Slot k opens k * 100ms after the first submission.
    for (job, elapsed) in runs {
        let earliest = Duration::from_millis(100 * u64::from(job));
        assert!(
            elapsed + Duration::from_millis(1) >= earliest,
            "job {job} ran after {elapsed:?}, expected at least {earliest:?}"
        );
    }
}

#[test]
fn test_concurrent_producers_get_distinct_slots() {
    let delays = Arc::new(Mutex::new(Vec::new()));
    let sink = delays.clone();
    let observer: Arc<dyn Observer<usize>> = Arc::new(move |_: &usize, delay: Duration| {
        sink.lock().unwrap().push(delay);
    });

    let pool = Arc::new(WorkerPool::<usize>::with_defaults().unwrap());
    let config = ControllerConfig::new()
        .with_estimator(Arc::new(TokenBucket::per_second(10.0, 1)))
        .with_observer(observer);
    let controller = Arc::new(FlowController::new(pool.clone(), config));

    let barrier = Arc::new(Barrier::new(10));
    let handles: Vec<_> = (0..10)
        .map(|id| {
            let controller = controller.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                controller.submit(|_| Ok(()), id).unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let mut delays = delays.lock().unwrap().clone();
    delays.sort();

    assert_eq!(delays.len(), 9, "exactly one producer should be admitted at once");
    for pair in delays.windows(2) {
        assert!(pair[0] < pair[1], "delays must be distinct: {delays:?}");
    }
    for delay in &delays {
        assert_eq!(delay.as_millis() % 100, 0);
        assert!(*delay <= Duration::from_millis(900));
    }

    let metrics = controller.metrics();
    assert_eq!(metrics.admitted_immediately, 1);
    assert_eq!(metrics.admitted_delayed, 9);

    controller.stop();
    pool.join();
    assert_eq!(pool.stats().executed, 10);
}

#[test]
fn test_stop_does_not_cancel_accepted_work() {
    let (controller, pool) = FlowControllerBuilder::<u32>::new()
        .rate(20.0)
        .burst(1)
        .build_with_pool()
        .unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    for job in 0..4 {
        let ran = ran.clone();
        controller
            .submit(
                move |_| {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                job,
            )
            .unwrap();
    }

    assert!(controller.stop());
    assert_eq!(
        controller.submit(|_| Ok(()), 99).unwrap_err(),
        FlowError::Stopped
    );

    pool.join();
    assert_eq!(ran.load(Ordering::SeqCst), 4);
    assert_eq!(pool.stats().pending_delayed, 0);
    assert!(pool.is_stopped());
}

#[test]
fn test_stopped_backend_rejection_propagates() {
    let pool = Arc::new(WorkerPool::<u32>::with_defaults().unwrap());
    let controller = FlowController::new(pool.clone(), None);

    pool.stop();

    let err = controller.submit(|_| Ok(()), 1).unwrap_err();
    assert!(matches!(err, FlowError::SubmissionFailed { .. }));
    assert_eq!(controller.metrics().rejected, 1);

    // The controller itself is still running and stops the backend once more
    // without trouble.
    assert!(controller.stop());
    pool.join();
}

#[test]
fn test_failing_tasks_do_not_stop_workers() {
    let pool = Arc::new(
        WorkerPool::<u32>::new(WorkerPoolConfig::new().with_workers(1)).unwrap(),
    );
    let controller = FlowController::new(
        pool.clone(),
        ControllerConfig::new().with_estimator(Arc::new(NullEstimator::new())),
    );

    controller.submit(|_| Err("boom".into()), 1).unwrap();
    controller.submit(|_| panic!("task panic"), 2).unwrap();
    controller.submit(|_| Ok(()), 3).unwrap();

    controller.stop();
    pool.join();

    let stats = pool.stats();
    assert_eq!(stats.executed, 3);
    assert_eq!(stats.failed, 2);
}

#[test]
fn test_many_concurrent_stops() {
    let pool = Arc::new(WorkerPool::<u32>::with_defaults().unwrap());
    let controller = Arc::new(FlowController::new(pool.clone(), None));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let controller = controller.clone();
            thread::spawn(move || controller.stop())
        })
        .collect();

    let stopped = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();

    assert_eq!(stopped, 1);
    assert!(controller.is_stopped());
    pool.join();
}

#[test]
fn test_missing_backend() {
    let backend: Option<Arc<dyn ExecutionBackend<u32>>> = None;
    let result = FlowController::try_new(backend, ControllerConfig::new());
    assert_eq!(result.unwrap_err(), FlowError::InvalidBackend);
}

#[test]
fn test_sustained_rate_ceiling() {
    let (controller, pool) = FlowControllerBuilder::<u32>::new()
        .rate(50.0)
        .burst(5)
        .tick(Duration::from_millis(10))
        .workers(4)
        .build_with_pool()
        .unwrap();

    let start = Instant::now();
    let last_run = Arc::new(Mutex::new(Duration::ZERO));

    for job in 0..25 {
        let last_run = last_run.clone();
        controller
            .submit(
                move |_| {
                    let mut last = last_run.lock().unwrap();
                    *last = (*last).max(start.elapsed());
                    Ok(())
                },
                job,
            )
            .unwrap();
    }

    controller.stop();
    pool.join();

    // 5 run at once, the other 20 are spaced by 20ms.
    let last = *last_run.lock().unwrap();
    assert!(last >= Duration::from_millis(399), "finished too early: {last:?}");
    assert_eq!(pool.stats().executed, 25);

    let metrics = controller.metrics();
    assert_eq!(metrics.admitted_immediately, 5);
    assert_eq!(metrics.admitted_delayed, 20);
}
