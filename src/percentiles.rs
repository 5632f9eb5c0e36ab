//! HDR-histogram-backed percentile latency tracking for the load-test
//! driver. One global tracker covers stage-wide quantiles; one
//! LRU-bounded per-URL tracker covers per-URL quantiles, since URLs are
//! effectively unbounded in number and need a bound on retained state.
//!
//! - P50 (median), P90, P95, P99, P99.9 percentile tracking
//! - Per-URL percentile tracking, LRU-bounded
//! - Thread-safe concurrent updates
//! - O(1)-ish memory per sample via HdrHistogram bucketing

use hdrhistogram::Histogram;
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Percentile statistics for a set of latency measurements, in
/// microseconds.
#[derive(Debug, Clone)]
pub struct PercentileStats {
    pub count: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p50: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub p99_9: u64,
}

impl PercentileStats {
    pub fn format(&self) -> String {
        format!(
            "count={}, min={:.2}ms, max={:.2}ms, mean={:.2}ms, p50={:.2}ms, p90={:.2}ms, p95={:.2}ms, p99={:.2}ms, p99.9={:.2}ms",
            self.count,
            self.min as f64 / 1000.0,
            self.max as f64 / 1000.0,
            self.mean / 1000.0,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
            self.p99_9 as f64 / 1000.0,
        )
    }

    pub fn format_table_row(&self, label: &str) -> String {
        format!(
            "{:<30} {:>8} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2} {:>8.2}",
            label,
            self.count,
            self.p50 as f64 / 1000.0,
            self.p90 as f64 / 1000.0,
            self.p95 as f64 / 1000.0,
            self.p99 as f64 / 1000.0,
            self.p99_9 as f64 / 1000.0,
            self.mean / 1000.0,
            self.max as f64 / 1000.0,
        )
    }
}

/// Thread-safe percentile tracker backed by a single HDR histogram,
/// tracking latencies from 1μs to 60s with 3 significant digits.
pub struct PercentileTracker {
    histogram: Arc<Mutex<Histogram<u64>>>,
}

impl PercentileTracker {
    pub fn new() -> Self {
        let histogram = Histogram::new_with_bounds(1, 60_000_000, 3).expect("valid histogram bounds");
        Self {
            histogram: Arc::new(Mutex::new(histogram)),
        }
    }

    pub fn record_ms(&self, latency_ms: u64) {
        self.record_us(latency_ms * 1000);
    }

    pub fn record_us(&self, latency_us: u64) {
        let mut hist = self.histogram.lock().unwrap();
        let clamped = latency_us.clamp(1, 60_000_000);
        if let Err(e) = hist.record(clamped) {
            warn!(latency_us, error = %e, "failed to record latency in histogram");
        }
    }

    /// Current percentile statistics, or `None` if empty.
    pub fn stats(&self) -> Option<PercentileStats> {
        let hist = self.histogram.lock().unwrap();
        if hist.is_empty() {
            return None;
        }
        Some(PercentileStats {
            count: hist.len(),
            min: hist.min(),
            max: hist.max(),
            mean: hist.mean(),
            p50: hist.value_at_quantile(0.50),
            p90: hist.value_at_quantile(0.90),
            p95: hist.value_at_quantile(0.95),
            p99: hist.value_at_quantile(0.99),
            p99_9: hist.value_at_quantile(0.999),
        })
    }

    pub fn reset(&self) {
        self.histogram.lock().unwrap().clear();
    }
}

impl Default for PercentileTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-URL percentile tracker with LRU eviction, so a load test against
/// an unbounded set of URLs can't grow memory without limit.
pub struct MultiLabelPercentileTracker {
    trackers: Arc<Mutex<LruCache<String, PercentileTracker>>>,
    max_labels: usize,
    warned_at_80_percent: Arc<Mutex<bool>>,
}

impl MultiLabelPercentileTracker {
    pub fn new_with_limit(max_labels: usize) -> Self {
        let capacity = NonZeroUsize::new(max_labels).unwrap_or(NonZeroUsize::new(100).unwrap());
        Self {
            trackers: Arc::new(Mutex::new(LruCache::new(capacity))),
            max_labels,
            warned_at_80_percent: Arc::new(Mutex::new(false)),
        }
    }

    pub fn new() -> Self {
        Self::new_with_limit(1000)
    }

    pub fn record(&self, label: &str, latency_ms: u64) {
        let mut trackers = self.trackers.lock().unwrap();

        let current_size = trackers.len();
        let threshold_80 = (self.max_labels as f64 * 0.8) as usize;
        if current_size >= threshold_80 && !trackers.contains(&label.to_string()) {
            let mut warned = self.warned_at_80_percent.lock().unwrap();
            if !*warned {
                warn!(
                    current_labels = current_size,
                    max_labels = self.max_labels,
                    "per-URL histogram label limit approaching, least-recently-used URLs will be evicted"
                );
                *warned = true;
            }
        }

        if !trackers.contains(&label.to_string()) {
            if trackers.len() >= self.max_labels {
                debug!(label, max_labels = self.max_labels, "per-URL histogram label limit reached, evicting LRU entry");
                crate::metrics::PERCENTILE_LABELS_EVICTED_TOTAL.inc();
            }
            trackers.put(label.to_string(), PercentileTracker::new());
        }

        if let Some(tracker) = trackers.get_mut(&label.to_string()) {
            tracker.record_ms(latency_ms);
        }
    }

    pub fn stats(&self, label: &str) -> Option<PercentileStats> {
        let trackers = self.trackers.lock().unwrap();
        trackers.peek(label).and_then(|t| t.stats())
    }

    pub fn all_stats(&self) -> HashMap<String, PercentileStats> {
        let trackers = self.trackers.lock().unwrap();
        trackers
            .iter()
            .filter_map(|(label, tracker)| tracker.stats().map(|s| (label.clone(), s)))
            .collect()
    }

    pub fn labels(&self) -> Vec<String> {
        let trackers = self.trackers.lock().unwrap();
        trackers.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.trackers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.lock().unwrap().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_labels
    }

    pub fn reset_all(&self) {
        let mut trackers = self.trackers.lock().unwrap();
        trackers.clear();
        *self.warned_at_80_percent.lock().unwrap() = false;
    }
}

impl Default for MultiLabelPercentileTracker {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    /// Global tracker for whole-stage request latencies.
    pub static ref GLOBAL_REQUEST_PERCENTILES: PercentileTracker = PercentileTracker::new();

    /// Global tracker for per-URL request latencies.
    pub static ref GLOBAL_URL_PERCENTILES: MultiLabelPercentileTracker = MultiLabelPercentileTracker::new();
}

/// Clears both global trackers' histogram data, e.g. between stages.
pub fn rotate_all_histograms() {
    GLOBAL_REQUEST_PERCENTILES.reset();
    GLOBAL_URL_PERCENTILES.reset_all();
}

/// Format a label->stats map as a fixed-width table.
pub fn format_percentile_table(title: &str, stats_map: &HashMap<String, PercentileStats>) -> String {
    if stats_map.is_empty() {
        return format!("## {}\n\nNo data available.\n", title);
    }

    let mut output = String::new();
    output.push_str(&format!("\n## {}\n\n", title));
    output.push_str(&format!(
        "{:<30} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8}\n",
        "Label", "Count", "P50", "P90", "P95", "P99", "P99.9", "Mean", "Max"
    ));
    output.push_str(&"-".repeat(120));
    output.push('\n');

    let mut labels: Vec<_> = stats_map.keys().collect();
    labels.sort();
    for label in labels {
        output.push_str(&stats_map[label].format_table_row(label));
        output.push('\n');
    }

    output
}
