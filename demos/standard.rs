//! Standard usage: a worker pool, an explicit controller config and ten
//! producer threads submitting at once.

use flowgate::{ControllerConfig, FlowController, TokenBucket, WorkerPool, WorkerPoolConfig};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== Standard Flow Controller Example ===\n");

    // Two workers execute whatever the controller hands over.
    let pool = Arc::new(
        WorkerPool::<String>::new(WorkerPoolConfig::new().with_workers(2))
            .expect("failed to start worker pool"),
    );

    // 10 jobs per second, no bursting.
    let config = ControllerConfig::new()
        .with_estimator(Arc::new(TokenBucket::per_second(10.0, 1)))
        .with_observer(Arc::new(|msg: &String, delay: Duration| {
            println!("   limited: {msg} waits {delay:?}");
        }));

    let controller = Arc::new(FlowController::new(pool.clone(), config));

    let producers: Vec<_> = (0..10)
        .map(|i| {
            let controller = controller.clone();
            thread::spawn(move || {
                let msg = format!("hello from producer {i}");
                if let Err(e) = controller.submit(
                    |msg: String| {
                        println!("   ✅ {msg}");
                        Ok(())
                    },
                    msg,
                ) {
                    eprintln!("   ❌ producer {i}: {e}");
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().expect("producer panicked");
    }

    // Let the delayed jobs come due before shutting down.
    thread::sleep(Duration::from_millis(1_200));

    controller.stop();
    pool.join();

    println!("\n{}", controller.metrics());
    println!("\nPool: {:?}", pool.stats());
}
