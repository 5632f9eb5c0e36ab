//! Error analyzer and load-test skip-list builder (§4.8).

use std::collections::HashMap;

use crate::error_category::ErrorCategory;
use crate::results::{AnalysisResult, ProcessResult};

/// Analyzes a completed pre-warm run's task results, producing an
/// error-rate summary and a skip-list of URLs whose most recent
/// failure fell into a "problematic" category (timeout, server_error,
/// rate_limited).
pub fn analyze(process_results: &[ProcessResult]) -> AnalysisResult {
    let mut total_requests: u64 = 0;
    let mut total_errors: u64 = 0;
    let mut errors_by_type: HashMap<String, u64> = HashMap::new();
    let mut errors_by_category: HashMap<ErrorCategory, u64> = HashMap::new();
    let mut skip_list: Vec<String> = Vec::new();

    for process_result in process_results {
        for task_result in &process_result.task_results {
            total_requests += 1;
            if task_result.success {
                continue;
            }

            total_errors += 1;
            if let Some(message) = &task_result.error_message {
                *errors_by_type.entry(message.clone()).or_insert(0) += 1;
            }
            if let Some(category) = task_result.error_category {
                *errors_by_category.entry(category).or_insert(0) += 1;
                if category.is_problematic() {
                    skip_list.push(task_result.task.url.clone());
                }
            }
        }
    }

    let error_rate = if total_requests == 0 {
        0.0
    } else {
        total_errors as f64 / total_requests as f64
    };

    let mut most_common_errors: Vec<(String, u64)> = errors_by_type.iter().map(|(k, v)| (k.clone(), *v)).collect();
    most_common_errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    skip_list.sort();
    skip_list.dedup();

    AnalysisResult {
        total_errors,
        error_rate,
        errors_by_type,
        errors_by_category,
        most_common_errors,
        skip_list,
    }
}
