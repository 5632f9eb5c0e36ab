//! Size-tiered concurrent worker pool (§4.5).
//!
//! Three independent sub-pools, one per [`SizeCategory`], each with its
//! own bounded queue and worker budget — no work-stealing between
//! tiers. Grounded on the mpsc-request/oneshot-response/semaphore-backpressure
//! shape in the `doorway` worker-pool reference (request queue,
//! semaphore-gated admission, `tokio::time::timeout` per task), widened
//! here to three parallel instances and to run arbitrary async task
//! closures rather than a fixed RPC payload.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::collector::MetricCollector;
use crate::error_category::ErrorCategory;
use crate::results::{PoolCategoryStats, WorkerPoolStats};
use crate::size_category::SizeCategory;

/// A task's boxed async body: takes no captured state beyond its own
/// closure environment and resolves to an `(ok, error_category)` pair.
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskOutcome> + Send>>;
pub type TaskThunk = Box<dyn FnOnce() -> TaskFuture + Send>;

/// Outcome of running one submitted task. Carries the request-level
/// detail (status/timing/bytes) alongside the pass/fail verdict so
/// callers don't have to recompute it from a discarded `RequestResult`.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub success: bool,
    pub status_code: Option<u16>,
    pub duration_secs: f64,
    pub response_bytes: u64,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
}

/// Error returned by [`SizeTieredPool::submit`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("queue full for category {0}")]
    QueueFull(SizeCategory),
    #[error("pool is shut down")]
    ShuttingDown,
}

struct QueuedTask {
    thunk: TaskThunk,
    response_tx: Option<oneshot::Sender<TaskOutcome>>,
    // Held until the worker dequeues this task; dropping it frees one
    // unit of queue capacity for the next `submit` call, so available
    // permits always equal remaining queue headroom.
    _permit: tokio::sync::OwnedSemaphorePermit,
}

/// Tunables for one sub-pool.
#[derive(Debug, Clone, Copy)]
pub struct CategoryPoolConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    pub task_timeout: Duration,
}

/// Tunables for the whole tiered pool. Per-category worker counts
/// default to a 60/30/10% split (small/medium/large) when
/// `size_optimized_allocation` is set, else equal thirds.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub total_workers: usize,
    pub queue_multiplier: usize,
    pub task_timeout: Duration,
    pub size_optimized_allocation: bool,
    pub enqueue_wait: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            total_workers: 30,
            queue_multiplier: 10,
            task_timeout: Duration::from_secs(30),
            size_optimized_allocation: false,
            enqueue_wait: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    fn per_category(&self) -> HashMap<SizeCategory, CategoryPoolConfig> {
        let (small_pct, medium_pct, large_pct) = if self.size_optimized_allocation {
            (0.6, 0.3, 0.1)
        } else {
            (1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0)
        };

        let small_workers = ((self.total_workers as f64 * small_pct).round() as usize).max(1);
        let medium_workers = ((self.total_workers as f64 * medium_pct).round() as usize).max(1);
        let large_workers = self
            .total_workers
            .saturating_sub(small_workers)
            .saturating_sub(medium_workers)
            .max(1);

        let mut map = HashMap::new();
        for (category, workers) in [
            (SizeCategory::Small, small_workers),
            (SizeCategory::Medium, medium_workers),
            (SizeCategory::Large, large_workers),
        ] {
            map.insert(
                category,
                CategoryPoolConfig {
                    worker_count: workers,
                    queue_capacity: workers * self.queue_multiplier,
                    task_timeout: self.task_timeout,
                },
            );
        }
        map
    }
}

struct SubPool {
    category: SizeCategory,
    tx: mpsc::Sender<QueuedTask>,
    admission: Arc<Semaphore>,
    worker_count: usize,
    queue_capacity: usize,
    tasks_submitted: Arc<AtomicU64>,
    tasks_completed: Arc<AtomicU64>,
    tasks_failed: Arc<AtomicU64>,
    active: Arc<AtomicUsize>,
    shutdown_workers: Vec<JoinHandle<()>>,
}

/// Size-tiered worker pool: three independently-scheduled sub-pools.
pub struct SizeTieredPool {
    sub_pools: HashMap<SizeCategory, SubPool>,
    shutting_down: Arc<AtomicBool>,
    collector: Arc<MetricCollector>,
}

impl SizeTieredPool {
    pub fn new(config: PoolConfig, collector: Arc<MetricCollector>) -> Self {
        let shutting_down = Arc::new(AtomicBool::new(false));
        let mut sub_pools = HashMap::new();

        for (category, cat_config) in config.per_category() {
            let (tx, rx) = mpsc::channel::<QueuedTask>(cat_config.queue_capacity);
            let rx = Arc::new(tokio::sync::Mutex::new(rx));
            let admission = Arc::new(Semaphore::new(cat_config.queue_capacity));
            let tasks_submitted = Arc::new(AtomicU64::new(0));
            let tasks_completed = Arc::new(AtomicU64::new(0));
            let tasks_failed = Arc::new(AtomicU64::new(0));
            let active = Arc::new(AtomicUsize::new(0));

            let mut handles = Vec::with_capacity(cat_config.worker_count);
            for worker_id in 0..cat_config.worker_count {
                let rx = Arc::clone(&rx);
                let shutting_down = Arc::clone(&shutting_down);
                let collector = Arc::clone(&collector);
                let tasks_completed = Arc::clone(&tasks_completed);
                let tasks_failed = Arc::clone(&tasks_failed);
                let active = Arc::clone(&active);
                let timeout = cat_config.task_timeout;

                handles.push(tokio::spawn(async move {
                    worker_loop(
                        category,
                        worker_id,
                        rx,
                        shutting_down,
                        collector,
                        tasks_completed,
                        tasks_failed,
                        active,
                        timeout,
                    )
                    .await;
                }));
            }

            sub_pools.insert(
                category,
                SubPool {
                    category,
                    tx,
                    admission,
                    worker_count: cat_config.worker_count,
                    queue_capacity: cat_config.queue_capacity,
                    tasks_submitted,
                    tasks_completed,
                    tasks_failed,
                    active,
                    shutdown_workers: handles,
                },
            );
        }

        Self {
            sub_pools,
            shutting_down,
            collector,
        }
    }

    /// Submit a task to the sub-pool for `category`.
    ///
    /// Tries a non-blocking enqueue first; if the queue is full, waits
    /// up to `enqueue_wait` (captured at construction via the semaphore
    /// permit acquire timeout) before giving up with
    /// [`PoolError::QueueFull`]. Result delivery is non-blocking — if the
    /// caller drops the returned receiver, the result is silently
    /// discarded rather than blocking the worker.
    pub async fn submit(
        &self,
        category: SizeCategory,
        enqueue_wait: Duration,
        thunk: TaskThunk,
    ) -> Result<oneshot::Receiver<TaskOutcome>, PoolError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(PoolError::ShuttingDown);
        }

        let sub_pool = self
            .sub_pools
            .get(&category)
            .expect("all three categories are always present");

        let permit = match tokio::time::timeout(enqueue_wait, sub_pool.admission.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(PoolError::ShuttingDown),
            Err(_) => return Err(PoolError::QueueFull(category)),
        };

        let (response_tx, response_rx) = oneshot::channel();
        let queued = QueuedTask {
            thunk,
            response_tx: Some(response_tx),
            _permit: permit,
        };

        if sub_pool.tx.send(queued).await.is_err() {
            return Err(PoolError::ShuttingDown);
        }

        sub_pool.tasks_submitted.fetch_add(1, Ordering::Relaxed);
        self.collector.adjust_queue_depth(1);

        Ok(response_rx)
    }

    /// Point-in-time snapshot across all three sub-pools.
    pub fn snapshot(&self) -> WorkerPoolStats {
        let stat = |category: SizeCategory| -> PoolCategoryStats {
            let sp = &self.sub_pools[&category];
            let active = sp.active.load(Ordering::Relaxed);
            PoolCategoryStats {
                worker_count: sp.worker_count,
                active,
                idle: sp.worker_count.saturating_sub(active),
                queue_depth: sp.queue_capacity.saturating_sub(sp.admission.available_permits()),
                tasks_submitted: sp.tasks_submitted.load(Ordering::Relaxed),
                tasks_completed: sp.tasks_completed.load(Ordering::Relaxed),
                tasks_failed: sp.tasks_failed.load(Ordering::Relaxed),
            }
        };

        WorkerPoolStats {
            small: stat(SizeCategory::Small),
            medium: stat(SizeCategory::Medium),
            large: stat(SizeCategory::Large),
        }
    }

    /// Idempotent graceful shutdown. The CAS guard ensures a second
    /// caller observes the first shutdown's effects rather than racing
    /// to close already-closed channels. Closes each sub-pool's sender only after
    /// dropping it here lets in-flight sends fail fast; workers drain
    /// their channel to completion before the JoinHandles resolve, so
    /// `shutdown` always observes a fully drained, stopped pool.
    pub async fn shutdown(mut self) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("shutdown called more than once, ignoring");
            return;
        }

        for (_, sub_pool) in self.sub_pools.drain() {
            drop(sub_pool.tx);
            for handle in sub_pool.shutdown_workers {
                if let Err(e) = handle.await {
                    error!(error = %e, "worker task panicked during shutdown");
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn worker_loop(
    category: SizeCategory,
    worker_id: usize,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedTask>>>,
    shutting_down: Arc<AtomicBool>,
    collector: Arc<MetricCollector>,
    tasks_completed: Arc<AtomicU64>,
    tasks_failed: Arc<AtomicU64>,
    active: Arc<AtomicUsize>,
    task_timeout: Duration,
) {
    debug!(%category, worker_id, "worker started");
    loop {
        let queued = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };

        let Some(mut queued) = queued else {
            break;
        };

        collector.adjust_queue_depth(-1);
        active.fetch_add(1, Ordering::Relaxed);
        collector.adjust_active(1);

        let response_tx = queued.response_tx.take();
        let future = (queued.thunk)();

        let outcome = match tokio::time::timeout(task_timeout, future).await {
            Ok(outcome) => outcome,
            Err(_) => TaskOutcome {
                success: false,
                status_code: None,
                duration_secs: task_timeout.as_secs_f64(),
                response_bytes: 0,
                error_category: Some(ErrorCategory::TaskTimeout),
                error_message: Some("task exceeded its timeout".to_string()),
            },
        };

        active.fetch_sub(1, Ordering::Relaxed);
        collector.adjust_active(-1);

        if outcome.success {
            tasks_completed.fetch_add(1, Ordering::Relaxed);
        } else {
            tasks_failed.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(tx) = response_tx {
            // Non-blocking: if the caller dropped the receiver, this is
            // a no-op rather than a block.
            let _ = tx.send(outcome);
        }

        if shutting_down.load(Ordering::Acquire) {
            // Keep draining the queue until `rx.recv()` returns `None`
            // (sender dropped) rather than exiting early — in-flight
            // submissions must still get an answer.
            continue;
        }
    }
    debug!(%category, worker_id, "worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;
    use std::time::Duration as StdDuration;

    fn ok_outcome() -> TaskOutcome {
        TaskOutcome {
            success: true,
            status_code: Some(200),
            duration_secs: 0.01,
            response_bytes: 128,
            error_category: None,
            error_message: None,
        }
    }

    fn make_pool(total_workers: usize, queue_multiplier: usize) -> SizeTieredPool {
        let collector = Arc::new(MetricCollector::new());
        SizeTieredPool::new(
            PoolConfig {
                total_workers,
                queue_multiplier,
                task_timeout: StdDuration::from_secs(2),
                size_optimized_allocation: false,
                enqueue_wait: StdDuration::from_millis(200),
            },
            collector,
        )
    }

    #[tokio::test]
    async fn test_submit_and_receive_result() {
        let pool = make_pool(3, 4);
        let rx = pool
            .submit(
                SizeCategory::Small,
                Duration::from_millis(200),
                Box::new(|| Box::pin(async { ok_outcome() })),
            )
            .await
            .unwrap();
        let outcome = rx.await.unwrap();
        assert!(outcome.success);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_categories_run_independently() {
        let pool = make_pool(3, 4);
        let counter = Arc::new(AtomicI32::new(0));

        let c1 = Arc::clone(&counter);
        let rx1 = pool
            .submit(
                SizeCategory::Small,
                Duration::from_millis(200),
                Box::new(move || {
                    Box::pin(async move {
                        c1.fetch_add(1, Ordering::SeqCst);
                        ok_outcome()
                    })
                }),
            )
            .await
            .unwrap();

        let c2 = Arc::clone(&counter);
        let rx2 = pool
            .submit(
                SizeCategory::Large,
                Duration::from_millis(200),
                Box::new(move || {
                    Box::pin(async move {
                        c2.fetch_add(10, Ordering::SeqCst);
                        ok_outcome()
                    })
                }),
            )
            .await
            .unwrap();

        rx1.await.unwrap();
        rx2.await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_task_timeout_reported_as_task_timeout_category() {
        let pool = make_pool(1, 2);
        let rx = pool
            .submit(
                SizeCategory::Medium,
                Duration::from_millis(200),
                Box::new(|| {
                    Box::pin(async {
                        tokio::time::sleep(StdDuration::from_secs(5)).await;
                        ok_outcome()
                    })
                }),
            )
            .await
            .unwrap();
        // pool's task_timeout is 2s, shorter than the sleeping task.
        let outcome = tokio::time::timeout(StdDuration::from_secs(3), rx)
            .await
            .unwrap()
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error_category, Some(ErrorCategory::TaskTimeout));
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_reports_worker_counts() {
        let pool = make_pool(9, 4);
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.small.worker_count, 3);
        assert_eq!(snapshot.medium.worker_count, 3);
        assert_eq!(snapshot.large.worker_count, 3);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_size_optimized_allocation_splits_60_30_10() {
        let collector = Arc::new(MetricCollector::new());
        let pool = SizeTieredPool::new(
            PoolConfig {
                total_workers: 100,
                queue_multiplier: 2,
                task_timeout: StdDuration::from_secs(1),
                size_optimized_allocation: true,
                enqueue_wait: StdDuration::from_millis(200),
            },
            collector,
        );
        let snapshot = pool.snapshot();
        assert_eq!(snapshot.small.worker_count, 60);
        assert_eq!(snapshot.medium.worker_count, 30);
        assert_eq!(snapshot.large.worker_count, 10);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_when_called_twice() {
        let pool = make_pool(2, 2);
        // Simulate two observers racing to shut the pool down: since
        // `shutdown` consumes `self`, model the race via the shared flag.
        let flag = Arc::clone(&pool.shutting_down);
        assert!(!flag.load(Ordering::Acquire));
        pool.shutdown().await;
        assert!(flag.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_dropped_receiver_does_not_block_worker() {
        let pool = make_pool(1, 2);
        {
            let _rx = pool
                .submit(
                    SizeCategory::Small,
                    Duration::from_millis(200),
                    Box::new(|| Box::pin(async { ok_outcome() })),
                )
                .await
                .unwrap();
            // drop _rx immediately
        }
        // A second submission should still complete promptly.
        let rx2 = pool
            .submit(
                SizeCategory::Small,
                Duration::from_millis(200),
                Box::new(|| Box::pin(async { ok_outcome() })),
            )
            .await
            .unwrap();
        let outcome = tokio::time::timeout(StdDuration::from_secs(2), rx2)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.success);
        pool.shutdown().await;
    }
}
