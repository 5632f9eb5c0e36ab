//! Pre-warm pipeline: enumerate → categorize → derive → dispatch →
//! collect → finalize (§4.6).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::collector::MetricCollector;
use crate::error_category::ErrorCategory;
use crate::http_client::{CdnHttpClient, RequestOpts};
use crate::object_store::ObjectStore;
use crate::pool::{PoolError, SizeTieredPool, TaskOutcome};
use crate::results::{Object, PrewarmResult, ProcessResult, Task, TaskResult};
use crate::size_category::{SizeCategory, SizeThresholds};
use crate::url_synth::{synthesize_url, DeviceClass, UrlFormat};

/// One derivative/variant to request for every enumerated object.
#[derive(Debug, Clone)]
pub struct DerivativeSpec {
    pub name: String,
    pub format: UrlFormat,
    pub variant_label: Option<String>,
    /// Device class to size against for [`UrlFormat::ImWidth`]; ignored
    /// by the other formats.
    pub device: Option<DeviceClass>,
}

/// Knobs for a single pre-warm run.
#[derive(Debug, Clone)]
pub struct PrewarmConfig {
    pub base_url: String,
    pub prefix: String,
    pub extensions: Vec<String>,
    pub derivatives: Vec<DerivativeSpec>,
    pub size_thresholds: SizeThresholds,
    pub enqueue_wait: Duration,
    pub file_list_cache_path: Option<String>,
    pub file_list_cache_ttl: Duration,
    /// Probe with HEAD before GET, falling back to GET on a ≥400 status
    /// or transport error. Defaults to off, since some CDNs only
    /// populate cache on a GET and never on HEAD.
    pub use_head_before_get: bool,
}

/// On-disk cache of an enumerated file list, to skip re-listing the
/// store on every run within `file_list_cache_ttl` (§6).
#[derive(Debug, Serialize, Deserialize)]
struct FileListCache {
    cached_at_unix_secs: u64,
    entries: Vec<CachedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedEntry {
    key: String,
    size_bytes: i64,
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Runs the enumerate→categorize→derive→dispatch→collect→finalize
/// pipeline against a single object store.
pub struct PrewarmEngine {
    store: Arc<dyn ObjectStore>,
    pool: Arc<SizeTieredPool>,
    client: Arc<CdnHttpClient>,
    collector: Arc<MetricCollector>,
}

impl PrewarmEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        pool: Arc<SizeTieredPool>,
        client: Arc<CdnHttpClient>,
        collector: Arc<MetricCollector>,
    ) -> Self {
        Self {
            store,
            pool,
            client,
            collector,
        }
    }

    /// Enumerate objects under `config.prefix`, using the on-disk cache
    /// when present and younger than `file_list_cache_ttl`.
    async fn enumerate(&self, config: &PrewarmConfig) -> Result<Vec<Object>, Box<dyn std::error::Error + Send + Sync>> {
        if let Some(cache_path) = &config.file_list_cache_path {
            if let Some(cached) = read_cache_if_fresh(cache_path, config.file_list_cache_ttl) {
                info!(entries = cached.len(), "reusing cached file list");
                return Ok(cached
                    .into_iter()
                    .map(|e| Object {
                        size_category: config.size_thresholds.categorize(e.size_bytes),
                        key: e.key,
                        size_bytes: e.size_bytes,
                    })
                    .collect());
            }
        }

        let entries = self.store.list(&config.prefix, &config.extensions).await?;
        let objects: Vec<Object> = entries
            .into_iter()
            .map(|e| Object {
                size_category: config.size_thresholds.categorize(e.size_bytes),
                key: e.key,
                size_bytes: e.size_bytes,
            })
            .collect();

        if let Some(cache_path) = &config.file_list_cache_path {
            write_cache(
                cache_path,
                &objects
                    .iter()
                    .map(|o| CachedEntry {
                        key: o.key.clone(),
                        size_bytes: o.size_bytes,
                    })
                    .collect::<Vec<_>>(),
            );
        }

        Ok(objects)
    }

    /// Derive the task list for one object: one task per configured
    /// derivative, falling back to a single "simple" pass-through task
    /// when no derivatives are configured.
    fn derive_tasks(&self, base_url: &str, object: &Object, derivatives: &[DerivativeSpec]) -> Vec<Task> {
        if derivatives.is_empty() {
            let url = synthesize_url(base_url, &object.key, UrlFormat::Derivative, None, None, None);
            return vec![Task {
                object_key: object.key.clone(),
                url,
                derivative: Some("simple".to_string()),
                size_category: object.size_category,
                size_bytes: object.size_bytes,
            }];
        }

        derivatives
            .iter()
            .map(|d| {
                let url = synthesize_url(
                    base_url,
                    &object.key,
                    d.format,
                    Some(&d.name),
                    d.device,
                    d.variant_label.as_deref(),
                );
                Task {
                    object_key: object.key.clone(),
                    url,
                    derivative: Some(d.name.clone()),
                    size_category: object.size_category,
                    size_bytes: object.size_bytes,
                }
            })
            .collect()
    }

    /// Run the full pipeline and write the finalized JSON results file.
    pub async fn run(
        &self,
        config: &PrewarmConfig,
        cancel: watch::Receiver<bool>,
        output_path: Option<&str>,
    ) -> Result<PrewarmResult, Box<dyn std::error::Error + Send + Sync>> {
        let started_at_unix_secs = now_unix_secs();
        let objects = self.enumerate(config).await?;
        info!(count = objects.len(), "enumerated objects");

        let mut per_object: HashMap<String, Vec<TaskResult>> = HashMap::new();
        let mut object_category: HashMap<String, SizeCategory> = HashMap::new();

        for object in &objects {
            if *cancel.borrow() {
                warn!("cancellation observed, stopping dispatch early");
                break;
            }

            object_category.insert(object.key.clone(), object.size_category);
            let tasks = self.derive_tasks(&config.base_url, object, &config.derivatives);

            enum Pending {
                Awaiting(Task, tokio::sync::oneshot::Receiver<TaskOutcome>),
                Failed(TaskResult),
            }

            let mut pending = Vec::with_capacity(tasks.len());
            for task in tasks {
                let category = task.size_category;
                let client = Arc::clone(&self.client);
                let collector = Arc::clone(&self.collector);
                let cancel_clone = cancel.clone();
                let task_clone = task.clone();
                let use_head_before_get = config.use_head_before_get;

                let submit_result = self
                    .pool
                    .submit(
                        category,
                        config.enqueue_wait,
                        Box::new(move || {
                            Box::pin(async move {
                                let opts = RequestOpts::default();
                                let result = if use_head_before_get {
                                    let head = client.head(&cancel_clone, &task_clone.url, &opts).await;
                                    if head.status_code.map(|c| c >= 400).unwrap_or(true) {
                                        client.get(&cancel_clone, &task_clone.url, &opts).await
                                    } else {
                                        head
                                    }
                                } else {
                                    client.get(&cancel_clone, &task_clone.url, &opts).await
                                };
                                collector.record_request(
                                    result.total_secs,
                                    result.response_bytes,
                                    result.is_success(),
                                );
                                TaskOutcome {
                                    success: result.is_success(),
                                    status_code: result.status_code,
                                    duration_secs: result.total_secs,
                                    response_bytes: result.response_bytes,
                                    error_category: result.error_category,
                                    error_message: result.error_message,
                                }
                            })
                        }),
                    )
                    .await;

                match submit_result {
                    Ok(rx) => pending.push(Pending::Awaiting(task, rx)),
                    Err(PoolError::QueueFull(category)) => {
                        self.collector.record_error("queue full");
                        pending.push(Pending::Failed(task_result_for_submit_failure(
                            task,
                            ErrorCategory::QueueFull,
                            format!("queue full for {category}"),
                        )));
                    }
                    Err(PoolError::ShuttingDown) => {
                        pending.push(Pending::Failed(task_result_for_submit_failure(
                            task,
                            ErrorCategory::Shutdown,
                            "pool shutting down".to_string(),
                        )));
                    }
                }
            }

            let mut results = Vec::with_capacity(pending.len());
            for item in pending {
                match item {
                    Pending::Failed(result) => results.push(result),
                    Pending::Awaiting(task, rx) => match rx.await {
                        Ok(outcome) => results.push(TaskResult {
                            success: outcome.success,
                            status_code: outcome.status_code,
                            duration_secs: outcome.duration_secs,
                            response_bytes: outcome.response_bytes,
                            error_category: outcome.error_category,
                            error_message: outcome.error_message,
                            task,
                        }),
                        Err(_) => results.push(task_result_for_submit_failure(
                            task,
                            ErrorCategory::Shutdown,
                            "worker dropped response channel".to_string(),
                        )),
                    },
                }
            }
            per_object.entry(object.key.clone()).or_default().extend(results);
        }

        let process_results: Vec<ProcessResult> = per_object
            .into_iter()
            .map(|(key, results)| {
                let category = object_category.get(&key).copied().unwrap_or(SizeCategory::Small);
                ProcessResult::from_task_results(key, category, results)
            })
            .collect();

        let finished_at_unix_secs = now_unix_secs();
        let result = PrewarmResult {
            objects_enumerated: objects.len() as u64,
            objects_processed: process_results.len() as u64,
            process_results,
            collector_summary: self.collector.summary(),
            pool_stats: self.pool.snapshot(),
            started_at_unix_secs,
            finished_at_unix_secs,
        };

        if let Some(path) = output_path {
            write_results_atomically(path, &result)?;
        }

        Ok(result)
    }
}

fn task_result_for_submit_failure(task: Task, category: ErrorCategory, message: String) -> TaskResult {
    TaskResult {
        success: false,
        status_code: None,
        duration_secs: 0.0,
        response_bytes: 0,
        error_category: Some(category),
        error_message: Some(message),
        task,
    }
}

fn read_cache_if_fresh(path: &str, ttl: Duration) -> Option<Vec<CachedEntry>> {
    let contents = std::fs::read_to_string(path).ok()?;
    let cache: FileListCache = serde_json::from_str(&contents).ok()?;
    let age = now_unix_secs().saturating_sub(cache.cached_at_unix_secs);
    if age > ttl.as_secs() {
        return None;
    }
    Some(cache.entries)
}

fn write_cache(path: &str, entries: &[CachedEntry]) {
    let cache = FileListCache {
        cached_at_unix_secs: now_unix_secs(),
        entries: entries
            .iter()
            .map(|e| CachedEntry {
                key: e.key.clone(),
                size_bytes: e.size_bytes,
            })
            .collect(),
    };
    if let Ok(json) = serde_json::to_string(&cache) {
        let _ = std::fs::write(path, json);
    }
}

/// Write the results file atomically: serialize to a temp path in the
/// same directory, then rename over the final path (§6).
fn write_results_atomically(
    path: &str,
    result: &PrewarmResult,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let json = serde_json::to_string_pretty(result)?;
    let tmp_path = format!("{}.tmp-{}", path, std::process::id());
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, Path::new(path))?;
    Ok(())
}
