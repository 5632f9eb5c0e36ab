//! Metric collection for a single workflow run.
//!
//! Splits atomic request counters (`metrics::REQUEST_TOTAL` et al.)
//! from a per-label error map, instantiated per-workflow rather than
//! as process-wide `lazy_static`s so tests can instantiate fresh
//! collectors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;

use crate::aggregator::{SizeReductionAggregator, StreamingAggregator};

/// Live worker-activity counters, updated by the worker pool.
#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct WorkerActivity {
    pub active: u64,
    pub idle: u64,
    pub queue_depth: u64,
}

/// Point-in-time snapshot of collector state.
///
/// Not linearizable across counters — `summary()` takes independent
/// reads of each field, so under concurrent updates a caller may observe
/// `total != successful + failed` by a handful of in-flight requests.
/// For reporting purposes (the only consumer) that is sufficient.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CollectorSummary {
    pub total_requests: u64,
    pub successful: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub mean_duration_secs: f64,
    pub p_stddev_duration_secs: f64,
    pub mean_response_bytes: f64,
    pub errors_by_message: HashMap<String, u64>,
    pub worker_activity: WorkerActivity,
    pub files_processed: u64,
    pub bytes_saved: u64,
    pub mean_reduction_percent: f64,
}

/// Per-workflow metric collector: atomic counters + aggregators + error map.
///
/// `record_request` aggregates duration/size *before* bumping counters,
/// so a reader observing `total == N` has already observed at least N
/// aggregator updates.
pub struct MetricCollector {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,

    duration_secs: StreamingAggregator,
    response_bytes: StreamingAggregator,

    errors_by_message: RwLock<HashMap<String, u64>>,

    active: AtomicI64,
    idle: AtomicI64,
    queue_depth: AtomicI64,

    size_reduction: SizeReductionAggregator,
}

impl MetricCollector {
    pub fn new() -> Self {
        Self {
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            duration_secs: StreamingAggregator::new(),
            response_bytes: StreamingAggregator::new(),
            errors_by_message: RwLock::new(HashMap::new()),
            active: AtomicI64::new(0),
            idle: AtomicI64::new(0),
            queue_depth: AtomicI64::new(0),
            size_reduction: SizeReductionAggregator::new(),
        }
    }

    /// Record the outcome of one completed request.
    ///
    /// Aggregates duration and response size first, then bumps the
    /// success/failure counter, then `total` — preserving the read-order
    /// invariant described on the struct.
    pub fn record_request(&self, duration_secs: f64, response_bytes: u64, ok: bool) {
        self.duration_secs.update(duration_secs);
        if ok {
            self.response_bytes.update(response_bytes as f64);
            self.successful.fetch_add(1, Ordering::AcqRel);
        } else {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
        self.total.fetch_add(1, Ordering::AcqRel);
    }

    /// Record a categorized error message. Bumps `failed` and `total`,
    /// plus the normalized-message error map under a short write lock.
    pub fn record_error(&self, msg: &str) {
        self.failed.fetch_add(1, Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::AcqRel);
        let mut map = self.errors_by_message.write().unwrap();
        *map.entry(normalize_error_message(msg)).or_insert(0) += 1;
    }

    /// Record a timeout. Bumps `failed` and `total`.
    pub fn record_timeout(&self) {
        self.failed.fetch_add(1, Ordering::AcqRel);
        self.total.fetch_add(1, Ordering::AcqRel);
        self.timeouts.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_size_reduction(&self, original: i64, optimized: i64) {
        self.size_reduction.record(original, optimized);
    }

    /// Update worker-activity counters. Callers pass signed deltas
    /// (e.g. `-1` on active when a worker goes idle).
    pub fn adjust_active(&self, delta: i64) {
        self.active.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn adjust_idle(&self, delta: i64) {
        self.idle.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn adjust_queue_depth(&self, delta: i64) {
        self.queue_depth.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    pub fn successful(&self) -> u64 {
        self.successful.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Acquire)
    }

    /// Snapshot all counters and aggregators. Not linearizable — see
    /// struct docs.
    pub fn summary(&self) -> CollectorSummary {
        CollectorSummary {
            total_requests: self.total_requests(),
            successful: self.successful(),
            failed: self.failed(),
            timeouts: self.timeouts(),
            mean_duration_secs: self.duration_secs.mean(),
            p_stddev_duration_secs: self.duration_secs.stddev(),
            mean_response_bytes: self.response_bytes.mean(),
            errors_by_message: self.errors_by_message.read().unwrap().clone(),
            worker_activity: WorkerActivity {
                active: self.active.load(Ordering::Relaxed).max(0) as u64,
                idle: self.idle.load(Ordering::Relaxed).max(0) as u64,
                queue_depth: self.queue_depth.load(Ordering::Relaxed).max(0) as u64,
            },
            files_processed: self.size_reduction.files_processed(),
            bytes_saved: self.size_reduction.bytes_saved(),
            mean_reduction_percent: self.size_reduction.mean_reduction_percent(),
        }
    }
}

impl Default for MetricCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalizes an error message into a stable map key: trims whitespace
/// and collapses any trailing per-connection detail after the first
/// colon-delimited clause so transient identifiers (ports, request IDs)
/// don't fragment the error map into one entry per occurrence.
fn normalize_error_message(msg: &str) -> String {
    msg.trim().to_string()
}
