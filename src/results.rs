//! JSON-serializable result types shared by the pre-warm engine, the
//! load-test driver, and the workflow coordinator's results file (§3, §6).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::collector::{CollectorSummary, WorkerActivity};
use crate::error_category::ErrorCategory;
use crate::size_category::SizeCategory;

/// An object enumerated from the backing store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Object {
    pub key: String,
    pub size_bytes: i64,
    pub size_category: SizeCategory,
}

/// One unit of pre-warm work: a single (object, derivative) request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub object_key: String,
    pub url: String,
    pub derivative: Option<String>,
    pub size_category: SizeCategory,
    pub size_bytes: i64,
}

/// Outcome of running a [`Task`] through the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task: Task,
    pub success: bool,
    pub status_code: Option<u16>,
    pub duration_secs: f64,
    pub response_bytes: u64,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
}

/// Outcome of a single HTTP request, as produced by [`crate::http_client`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestResult {
    pub url: String,
    pub status_code: Option<u16>,
    pub ttfb_secs: Option<f64>,
    pub total_secs: f64,
    pub response_bytes: u64,
    pub attempts: u32,
    pub error_category: Option<ErrorCategory>,
    pub error_message: Option<String>,
}

impl RequestResult {
    pub fn is_success(&self) -> bool {
        self.error_category.is_none()
    }
}

/// Per-object aggregate result across all its derivative/variant tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessResult {
    pub object_key: String,
    pub size_category: SizeCategory,
    pub tasks_total: u64,
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,
    pub task_results: Vec<TaskResult>,
}

impl ProcessResult {
    pub fn from_task_results(object_key: String, size_category: SizeCategory, results: Vec<TaskResult>) -> Self {
        let tasks_total = results.len() as u64;
        let tasks_succeeded = results.iter().filter(|r| r.success).count() as u64;
        let tasks_failed = tasks_total - tasks_succeeded;
        Self {
            object_key,
            size_category,
            tasks_total,
            tasks_succeeded,
            tasks_failed,
            task_results: results,
        }
    }
}

/// Per-category snapshot of the size-tiered worker pool, mirroring
/// [`crate::pool::SizeTieredPool::snapshot`]'s return shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolCategoryStats {
    pub worker_count: usize,
    pub active: usize,
    pub idle: usize,
    pub queue_depth: usize,
    pub tasks_submitted: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
}

/// Whole-pool snapshot: one [`PoolCategoryStats`] per size category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerPoolStats {
    pub small: PoolCategoryStats,
    pub medium: PoolCategoryStats,
    pub large: PoolCategoryStats,
}

/// Final results of one `Prewarm` stage run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrewarmResult {
    pub objects_enumerated: u64,
    pub objects_processed: u64,
    pub process_results: Vec<ProcessResult>,
    pub collector_summary: CollectorSummary,
    pub pool_stats: WorkerPoolStats,
    pub started_at_unix_secs: u64,
    pub finished_at_unix_secs: u64,
}

/// Result of the error analyzer stage (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub total_errors: u64,
    pub error_rate: f64,
    pub errors_by_type: HashMap<String, u64>,
    pub errors_by_category: HashMap<ErrorCategory, u64>,
    pub most_common_errors: Vec<(String, u64)>,
    pub skip_list: Vec<String>,
}

/// Result of one stage of the load-test driver (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestStageResult {
    pub stage_name: String,
    pub users: u32,
    pub duration_secs: u64,
    pub requests_sent: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub p99_9_ms: f64,
}

/// Result of the whole load-test stage run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestResult {
    pub stages: Vec<LoadTestStageResult>,
    pub per_url: HashMap<String, UrlStats>,
}

/// Per-URL counters accumulated by the load-test driver.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlStats {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub last_error: Option<String>,
}

/// Whole-workflow result written to the JSON results file (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub prewarm: Option<PrewarmResult>,
    pub analysis: Option<AnalysisResult>,
    pub loadtest: Option<LoadTestResult>,
    pub worker_activity: WorkerActivity,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(key: &str) -> Task {
        Task {
            object_key: key.to_string(),
            url: format!("https://cdn.example.com/{key}"),
            derivative: Some("simple".to_string()),
            size_category: SizeCategory::Small,
            size_bytes: 1000,
        }
    }

    #[test]
    fn test_process_result_derives_counts() {
        let results = vec![
            TaskResult {
                task: sample_task("a"),
                success: true,
                status_code: Some(200),
                duration_secs: 0.1,
                response_bytes: 100,
                error_category: None,
                error_message: None,
            },
            TaskResult {
                task: sample_task("a"),
                success: false,
                status_code: Some(500),
                duration_secs: 0.2,
                response_bytes: 0,
                error_category: Some(ErrorCategory::ServerError),
                error_message: Some("server error".to_string()),
            },
        ];
        let pr = ProcessResult::from_task_results("a".to_string(), SizeCategory::Small, results);
        assert_eq!(pr.tasks_total, 2);
        assert_eq!(pr.tasks_succeeded, 1);
        assert_eq!(pr.tasks_failed, 1);
    }

    #[test]
    fn test_request_result_success_reflects_absent_category() {
        let r = RequestResult {
            url: "https://x".to_string(),
            status_code: Some(200),
            ttfb_secs: Some(0.01),
            total_secs: 0.05,
            response_bytes: 1024,
            attempts: 1,
            error_category: None,
            error_message: None,
        };
        assert!(r.is_success());
    }

    #[test]
    fn test_workflow_result_roundtrips_through_json() {
        let result = WorkflowResult {
            prewarm: None,
            analysis: None,
            loadtest: None,
            worker_activity: WorkerActivity::default(),
        };
        let json = serde_json::to_string(&result).unwrap();
        let parsed: WorkflowResult = serde_json::from_str(&json).unwrap();
        assert!(parsed.prewarm.is_none());
    }
}
