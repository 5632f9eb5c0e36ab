//! Streaming O(1)-memory statistics aggregation.
//!
//! [`StreamingAggregator`] maintains `{count, sum, sum_of_squares, min, max}`
//! under a read-write lock so `update` is O(1) and `mean`/`variance`/
//! `stddev`/`min`/`max` are O(1) reads. [`SizeReductionAggregator`] wraps
//! three of these (original size, optimized size, reduction ratio) plus
//! two atomic counters for the optional optimize path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

/// O(1)-memory running statistics over a stream of `f64` samples.
///
/// On empty state `min`/`max` report `0.0` as a sentinel — callers must
/// consult [`StreamingAggregator::count`] before trusting them.
pub struct StreamingAggregator {
    inner: RwLock<AggregatorState>,
}

#[derive(Clone, Copy)]
struct AggregatorState {
    count: u64,
    sum: f64,
    sum_of_squares: f64,
    min: f64,
    max: f64,
}

impl Default for AggregatorState {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            sum_of_squares: 0.0,
            min: 0.0,
            max: 0.0,
        }
    }
}

impl StreamingAggregator {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AggregatorState::default()),
        }
    }

    /// Record a new sample. O(1).
    pub fn update(&self, x: f64) {
        let mut state = self.inner.write().unwrap();
        if state.count == 0 {
            state.min = x;
            state.max = x;
        } else {
            if x < state.min {
                state.min = x;
            }
            if x > state.max {
                state.max = x;
            }
        }
        state.count += 1;
        state.sum += x;
        state.sum_of_squares += x * x;
    }

    pub fn count(&self) -> u64 {
        self.inner.read().unwrap().count
    }

    pub fn sum(&self) -> f64 {
        self.inner.read().unwrap().sum
    }

    pub fn mean(&self) -> f64 {
        let state = self.inner.read().unwrap();
        if state.count == 0 {
            0.0
        } else {
            state.sum / state.count as f64
        }
    }

    /// Sample variance: `(Σx² − n·μ²)/(n−1)`. Returns `0.0` for n < 2.
    pub fn variance(&self) -> f64 {
        let state = self.inner.read().unwrap();
        if state.count < 2 {
            return 0.0;
        }
        let n = state.count as f64;
        let mean = state.sum / n;
        ((state.sum_of_squares - n * mean * mean) / (n - 1.0)).max(0.0)
    }

    pub fn stddev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Sentinel `0.0` when empty — check [`Self::count`] first.
    pub fn min(&self) -> f64 {
        self.inner.read().unwrap().min
    }

    /// Sentinel `0.0` when empty — check [`Self::count`] first.
    pub fn max(&self) -> f64 {
        self.inner.read().unwrap().max
    }

    pub fn reset(&self) {
        *self.inner.write().unwrap() = AggregatorState::default();
    }
}

impl Default for StreamingAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregates original/optimized size pairs into size-reduction ratios.
///
/// Accepts `(original, optimized)` with `original > 0`; computes
/// `ratio = (original − optimized) / original` clamped to `[0, 1]`.
pub struct SizeReductionAggregator {
    original_size: StreamingAggregator,
    optimized_size: StreamingAggregator,
    reduction_ratio: StreamingAggregator,
    files_processed: AtomicU64,
    bytes_saved: AtomicU64,
}

impl SizeReductionAggregator {
    pub fn new() -> Self {
        Self {
            original_size: StreamingAggregator::new(),
            optimized_size: StreamingAggregator::new(),
            reduction_ratio: StreamingAggregator::new(),
            files_processed: AtomicU64::new(0),
            bytes_saved: AtomicU64::new(0),
        }
    }

    /// Record an (original, optimized) size pair in bytes.
    ///
    /// No-op if `original <= 0` (the ratio is undefined).
    pub fn record(&self, original: i64, optimized: i64) {
        if original <= 0 {
            return;
        }
        let ratio = ((original - optimized) as f64 / original as f64).clamp(0.0, 1.0);

        self.original_size.update(original as f64);
        self.optimized_size.update(optimized as f64);
        self.reduction_ratio.update(ratio);

        self.files_processed.fetch_add(1, Ordering::Relaxed);
        let saved = (original - optimized).max(0);
        self.bytes_saved.fetch_add(saved as u64, Ordering::Relaxed);
    }

    pub fn files_processed(&self) -> u64 {
        self.files_processed.load(Ordering::Relaxed)
    }

    pub fn bytes_saved(&self) -> u64 {
        self.bytes_saved.load(Ordering::Relaxed)
    }

    pub fn mean_reduction_percent(&self) -> f64 {
        self.reduction_ratio.mean() * 100.0
    }

    pub fn original_size_stats(&self) -> &StreamingAggregator {
        &self.original_size
    }

    pub fn optimized_size_stats(&self) -> &StreamingAggregator {
        &self.optimized_size
    }
}

impl Default for SizeReductionAggregator {
    fn default() -> Self {
        Self::new()
    }
}
