use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use prometheus::{Encoder, Gauge, Histogram, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::env;
use std::sync::{Arc, Mutex};
use tracing::{error, info};

lazy_static::lazy_static! {
    pub static ref METRIC_NAMESPACE: String =
        env::var("METRIC_NAMESPACE").unwrap_or_else(|_| "cdn_prewarm".to_string());

    // === Pre-warm request metrics ===

    pub static ref PREWARM_REQUESTS_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("prewarm_requests_total", "Total number of pre-warm HTTP requests issued")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref PREWARM_REQUESTS_FAILED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("prewarm_requests_failed_total", "Total number of failed pre-warm HTTP requests")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref PREWARM_REQUEST_DURATION_SECONDS: Histogram =
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "prewarm_request_duration_seconds",
                "Pre-warm HTTP request latencies in seconds."
            ).namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref PREWARM_ERRORS_BY_CATEGORY_TOTAL: IntCounterVec =
        IntCounterVec::new(
            Opts::new("prewarm_errors_by_category_total", "Pre-warm errors by classification category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    // === Worker pool gauges, one series per size category ===

    pub static ref POOL_ACTIVE_WORKERS: IntCounterVec =
        IntCounterVec::new(
            Opts::new("pool_active_workers", "Workers currently processing a task, by size category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    pub static ref POOL_QUEUE_DEPTH: IntCounterVec =
        IntCounterVec::new(
            Opts::new("pool_queue_depth", "Tasks queued awaiting a worker, by size category")
                .namespace(METRIC_NAMESPACE.as_str()),
            &["category"]
        ).unwrap();

    /// Tracks how often the per-URL percentile tracker (see
    /// `crate::percentiles`) evicts a least-recently-used label because
    /// its LRU bound was reached.
    pub static ref PERCENTILE_LABELS_EVICTED_TOTAL: IntCounter =
        IntCounter::with_opts(
            Opts::new("percentile_labels_evicted_total", "Number of per-URL percentile tracker entries evicted under LRU pressure")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();

    pub static ref CONCURRENT_REQUESTS: Gauge =
        Gauge::with_opts(
            Opts::new("concurrent_requests", "Number of HTTP requests currently in flight")
                .namespace(METRIC_NAMESPACE.as_str())
        ).unwrap();
}

/// Registers all metrics with the default Prometheus registry.
pub fn register_metrics() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    prometheus::default_registry().register(Box::new(PREWARM_REQUESTS_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(PREWARM_REQUESTS_FAILED_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(PREWARM_REQUEST_DURATION_SECONDS.clone()))?;
    prometheus::default_registry().register(Box::new(PREWARM_ERRORS_BY_CATEGORY_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(POOL_ACTIVE_WORKERS.clone()))?;
    prometheus::default_registry().register(Box::new(POOL_QUEUE_DEPTH.clone()))?;
    prometheus::default_registry().register(Box::new(PERCENTILE_LABELS_EVICTED_TOTAL.clone()))?;
    prometheus::default_registry().register(Box::new(CONCURRENT_REQUESTS.clone()))?;

    Ok(())
}

/// HTTP handler for the Prometheus metrics endpoint.
pub async fn metrics_handler(
    _req: Request<Body>,
    registry: Arc<Mutex<Registry>>,
) -> Result<Response<Body>, hyper::Error> {
    let encoder = TextEncoder::new();
    let metric_families = registry.lock().unwrap().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();

    let response = Response::builder()
        .status(200)
        .header("Content-Type", encoder.format_type())
        .body(Body::from(buffer))
        .unwrap();

    Ok(response)
}

/// Starts the Prometheus metrics HTTP server.
pub async fn start_metrics_server(port: u16, registry: Arc<Mutex<Registry>>) {
    let addr = ([0, 0, 0, 0], port).into();

    let make_svc = make_service_fn(move |_conn| {
        let registry_clone = registry.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                let registry_clone_inner = registry_clone.clone();
                async move { metrics_handler(req, registry_clone_inner).await }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);
    info!(port = port, addr = %addr, "metrics server listening");

    if let Err(e) = server.await {
        error!(error = %e, "metrics server error");
    }
}

/// Gathers and encodes metrics as a string for final output.
pub fn gather_metrics_string(registry: &Arc<Mutex<Registry>>) -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry.lock().unwrap().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!(error = %e, "failed to encode metrics to utf-8");
        String::from("# ERROR ENCODING METRICS TO UTF-8")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prewarm_counters_increment() {
        let before = PREWARM_REQUESTS_TOTAL.get();
        PREWARM_REQUESTS_TOTAL.inc();
        assert_eq!(PREWARM_REQUESTS_TOTAL.get(), before + 1);
    }

    #[test]
    fn test_errors_by_category_labeled() {
        PREWARM_ERRORS_BY_CATEGORY_TOTAL.with_label_values(&["timeout"]).inc();
        assert!(PREWARM_ERRORS_BY_CATEGORY_TOTAL.with_label_values(&["timeout"]).get() >= 1);
    }

    #[test]
    fn test_gather_metrics_string_contains_namespace() {
        let registry = Arc::new(Mutex::new(Registry::new()));
        registry
            .lock()
            .unwrap()
            .register(Box::new(PREWARM_REQUESTS_TOTAL.clone()))
            .ok();
        let output = gather_metrics_string(&registry);
        assert!(output.contains("cdn_prewarm") || output.is_empty());
    }
}
