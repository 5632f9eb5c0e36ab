//! Staged-concurrency load-test driver (§4.9).
//!
//! Replays a URL set at increasing concurrency levels, skipping URLs
//! the error analyzer flagged as problematic. Per-stage worker tasks
//! use a staggered-start, self-correcting-timer shape, simplified since
//! this driver targets a fixed concurrency per stage rather than a
//! continuous RPS curve.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use tokio::sync::{watch, Mutex};
use tracing::info;

use crate::collector::MetricCollector;
use crate::http_client::{CdnHttpClient, RequestOpts};
use crate::percentiles::{GLOBAL_REQUEST_PERCENTILES, GLOBAL_URL_PERCENTILES};
use crate::results::{LoadTestResult, LoadTestStageResult, UrlStats};

/// One stage of the staged-concurrency load test.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub users: u32,
    pub duration: Duration,
    pub ramp_up: Option<Duration>,
}

/// Knobs for the whole load-test run.
#[derive(Debug, Clone)]
pub struct LoadTestConfig {
    pub stages: Vec<Stage>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub large_file_skip_threshold_bytes: Option<i64>,
}

/// One URL eligible for replay, with the object size it was derived
/// from so the driver can apply `large_file_skip_threshold_bytes`
/// before a stage starts.
#[derive(Debug, Clone)]
pub struct LoadTestCandidate {
    pub url: String,
    pub size_bytes: i64,
}

struct UrlPool {
    urls: Vec<String>,
}

impl UrlPool {
    /// Build the eligible URL set: the candidate list minus anything on
    /// `skip_list`, minus anything at or above
    /// `large_file_skip_threshold_bytes` when that threshold is set.
    fn new(
        candidates: Vec<LoadTestCandidate>,
        skip_list: &[String],
        large_file_skip_threshold_bytes: Option<i64>,
    ) -> Self {
        let skip: std::collections::HashSet<&String> = skip_list.iter().collect();
        let urls = candidates
            .into_iter()
            .filter(|c| !skip.contains(&c.url))
            .filter(|c| {
                large_file_skip_threshold_bytes
                    .map(|threshold| c.size_bytes < threshold)
                    .unwrap_or(true)
            })
            .map(|c| c.url)
            .collect();
        Self { urls }
    }

    fn pick_random(&self) -> Option<&str> {
        let mut rng = rand::thread_rng();
        self.urls.choose(&mut rng).map(|s| s.as_str())
    }
}

/// Replays URLs at staged concurrency, recording per-URL counters and
/// computing global quantiles at the end of each stage.
pub struct LoadTestDriver {
    client: Arc<CdnHttpClient>,
    collector: Arc<MetricCollector>,
}

impl LoadTestDriver {
    pub fn new(client: Arc<CdnHttpClient>, collector: Arc<MetricCollector>) -> Self {
        Self { client, collector }
    }

    pub async fn run(
        &self,
        config: &LoadTestConfig,
        candidates: Vec<LoadTestCandidate>,
        skip_list: &[String],
        cancel: watch::Receiver<bool>,
    ) -> LoadTestResult {
        let pool = Arc::new(UrlPool::new(
            candidates,
            skip_list,
            config.large_file_skip_threshold_bytes,
        ));
        let per_url: Arc<Mutex<HashMap<String, UrlStats>>> = Arc::new(Mutex::new(HashMap::new()));
        let mut stage_results = Vec::with_capacity(config.stages.len());

        for stage in &config.stages {
            if *cancel.borrow() {
                info!(stage = %stage.name, "cancellation observed, stopping load test early");
                break;
            }

            GLOBAL_REQUEST_PERCENTILES.reset();
            let stage_result = self.run_stage(stage, config, Arc::clone(&pool), Arc::clone(&per_url), cancel.clone()).await;
            stage_results.push(stage_result);
        }

        let per_url_snapshot = per_url.lock().await.clone();
        LoadTestResult {
            stages: stage_results,
            per_url: per_url_snapshot,
        }
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        config: &LoadTestConfig,
        pool: Arc<UrlPool>,
        per_url: Arc<Mutex<HashMap<String, UrlStats>>>,
        cancel: watch::Receiver<bool>,
    ) -> LoadTestStageResult {
        let requests_sent = Arc::new(AtomicU64::new(0));
        let requests_succeeded = Arc::new(AtomicU64::new(0));
        let requests_failed = Arc::new(AtomicU64::new(0));

        if pool.urls.is_empty() {
            return LoadTestStageResult {
                stage_name: stage.name.clone(),
                users: stage.users,
                duration_secs: stage.duration.as_secs(),
                requests_sent: 0,
                requests_succeeded: 0,
                requests_failed: 0,
                p50_ms: 0.0,
                p90_ms: 0.0,
                p95_ms: 0.0,
                p99_ms: 0.0,
                p99_9_ms: 0.0,
            };
        }

        let stagger = stage
            .ramp_up
            .map(|r| r / stage.users.max(1))
            .unwrap_or(Duration::ZERO);

        let mut handles = Vec::with_capacity(stage.users as usize);
        for worker_idx in 0..stage.users {
            let pool = Arc::clone(&pool);
            let per_url = Arc::clone(&per_url);
            let client = Arc::clone(&self.client);
            let collector = Arc::clone(&self.collector);
            let requests_sent = Arc::clone(&requests_sent);
            let requests_succeeded = Arc::clone(&requests_succeeded);
            let requests_failed = Arc::clone(&requests_failed);
            let cancel = cancel.clone();
            let stage_duration = stage.duration;
            let max_retries = config.max_retries;
            let retry_delay = config.retry_delay;
            let start_delay = stagger * worker_idx;

            handles.push(tokio::spawn(async move {
                tokio::time::sleep(start_delay).await;
                let deadline = tokio::time::Instant::now() + stage_duration;

                while tokio::time::Instant::now() < deadline {
                    if *cancel.borrow() {
                        break;
                    }

                    let Some(url) = pool.pick_random().map(|s| s.to_string()) else {
                        break;
                    };

                    let mut attempt = 0;
                    let result = loop {
                        let opts = RequestOpts::default();
                        let result = client.get(&cancel, &url, &opts).await;
                        let ok = result.is_success();
                        if ok || attempt >= max_retries {
                            break result;
                        }
                        attempt += 1;
                        tokio::time::sleep(retry_delay * attempt).await;
                    };

                    requests_sent.fetch_add(1, Ordering::Relaxed);
                    if result.is_success() {
                        requests_succeeded.fetch_add(1, Ordering::Relaxed);
                    } else {
                        requests_failed.fetch_add(1, Ordering::Relaxed);
                    }

                    collector.record_request(result.total_secs, result.response_bytes, result.is_success());

                    let latency_ms = (result.total_secs * 1000.0).round() as u64;
                    GLOBAL_REQUEST_PERCENTILES.record_ms(latency_ms);
                    GLOBAL_URL_PERCENTILES.record(&url, latency_ms);

                    let mut map = per_url.lock().await;
                    let entry = map.entry(url.clone()).or_default();
                    entry.requests += 1;
                    if result.is_success() {
                        entry.successes += 1;
                    } else {
                        entry.failures += 1;
                        entry.last_error = result.error_message.clone();
                    }
                }
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        let stats = GLOBAL_REQUEST_PERCENTILES.stats();
        let (p50_ms, p90_ms, p95_ms, p99_ms, p99_9_ms) = stats
            .map(|s| {
                (
                    s.p50 as f64 / 1000.0,
                    s.p90 as f64 / 1000.0,
                    s.p95 as f64 / 1000.0,
                    s.p99 as f64 / 1000.0,
                    s.p99_9 as f64 / 1000.0,
                )
            })
            .unwrap_or((0.0, 0.0, 0.0, 0.0, 0.0));

        LoadTestStageResult {
            stage_name: stage.name.clone(),
            users: stage.users,
            duration_secs: stage.duration.as_secs(),
            requests_sent: requests_sent.load(Ordering::Relaxed),
            requests_succeeded: requests_succeeded.load(Ordering::Relaxed),
            requests_failed: requests_failed.load(Ordering::Relaxed),
            p50_ms,
            p90_ms,
            p95_ms,
            p99_ms,
            p99_9_ms,
        }
    }
}
