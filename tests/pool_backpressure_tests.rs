//! Integration tests for size-tiered pool backpressure: a full queue
//! must reject further submissions with `PoolError::QueueFull` rather
//! than blocking indefinitely, and categories must not interfere with
//! one another.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cdn_prewarm_core::collector::MetricCollector;
use cdn_prewarm_core::pool::{PoolConfig, PoolError, SizeTieredPool};
use cdn_prewarm_core::size_category::SizeCategory;

fn tiny_pool() -> SizeTieredPool {
    let collector = Arc::new(MetricCollector::new());
    // One worker and a queue multiplier of one gives each category a
    // single admission permit, so the second concurrent submit must
    // wait for it to free up.
    SizeTieredPool::new(
        PoolConfig {
            total_workers: 3,
            queue_multiplier: 1,
            task_timeout: Duration::from_secs(5),
            size_optimized_allocation: false,
            enqueue_wait: Duration::from_millis(50),
        },
        collector,
    )
}

#[tokio::test]
async fn test_queue_full_rejects_overflow_submission() {
    let pool = tiny_pool();

    let in_flight = Arc::new(tokio::sync::Notify::new());
    let release = Arc::new(tokio::sync::Notify::new());
    let in_flight_clone = Arc::clone(&in_flight);
    let release_clone = Arc::clone(&release);

    // Occupy the single Small admission permit with a task that blocks
    // until we tell it to finish.
    let _rx = pool
        .submit(
            SizeCategory::Small,
            Duration::from_millis(200),
            Box::new(move || {
                Box::pin(async move {
                    in_flight_clone.notify_one();
                    release_clone.notified().await;
                    cdn_prewarm_core::pool::TaskOutcome {
                        success: true,
                        status_code: Some(200),
                        duration_secs: 0.01,
                        response_bytes: 0,
                        error_category: None,
                        error_message: None,
                    }
                })
            }),
        )
        .await
        .unwrap();

    in_flight.notified().await;

    // The queue is now at capacity; this submission must time out
    // waiting for admission and report QueueFull rather than hang.
    let overflow = pool
        .submit(
            SizeCategory::Small,
            Duration::from_millis(50),
            Box::new(|| {
                Box::pin(async {
                    cdn_prewarm_core::pool::TaskOutcome {
                        success: true,
                        status_code: Some(200),
                        duration_secs: 0.01,
                        response_bytes: 0,
                        error_category: None,
                        error_message: None,
                    }
                })
            }),
        )
        .await;

    assert!(matches!(overflow, Err(PoolError::QueueFull(SizeCategory::Small))));

    release.notify_one();
    pool.shutdown().await;
}

#[tokio::test]
async fn test_queue_full_in_one_category_does_not_block_others() {
    let pool = tiny_pool();

    let release = Arc::new(tokio::sync::Notify::new());
    let release_clone = Arc::clone(&release);
    let _rx = pool
        .submit(
            SizeCategory::Small,
            Duration::from_millis(200),
            Box::new(move || {
                Box::pin(async move {
                    release_clone.notified().await;
                    cdn_prewarm_core::pool::TaskOutcome {
                        success: true,
                        status_code: Some(200),
                        duration_secs: 0.01,
                        response_bytes: 0,
                        error_category: None,
                        error_message: None,
                    }
                })
            }),
        )
        .await
        .unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = Arc::clone(&counter);
    let large_rx = pool
        .submit(
            SizeCategory::Large,
            Duration::from_millis(200),
            Box::new(move || {
                Box::pin(async move {
                    counter_clone.fetch_add(1, Ordering::SeqCst);
                    cdn_prewarm_core::pool::TaskOutcome {
                        success: true,
                        status_code: Some(200),
                        duration_secs: 0.01,
                        response_bytes: 0,
                        error_category: None,
                        error_message: None,
                    }
                })
            }),
        )
        .await
        .unwrap();

    let outcome = large_rx.await.unwrap();
    assert!(outcome.success);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    release.notify_one();
    pool.shutdown().await;
}
