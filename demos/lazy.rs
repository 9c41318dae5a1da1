//! One-call construction with the builder: rate, burst and an observer are
//! all that is needed.

use flowgate::FlowControllerBuilder;
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== Lazy Flow Controller Example ===\n");

    let (controller, pool) = FlowControllerBuilder::new()
        .rate(2.0)
        .burst(1)
        .on_delayed(|job: &u32, delay: Duration| {
            println!("   limited: job {job} waits {delay:?}");
        })
        .build_with_pool()
        .expect("failed to start worker pool");

    for job in 0..5u32 {
        controller
            .submit(
                |job| {
                    println!("   ✅ job {job} done");
                    Ok(())
                },
                job,
            )
            .expect("submission rejected");
    }

    // Stopping does not cancel the jobs already accepted.
    controller.stop();
    pool.join();

    println!("\n{}", controller.metrics());
}
