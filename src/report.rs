//! Minimal report hand-off (§4.7). Template rendering itself is out of
//! scope; this module only assembles the inputs a renderer would need.

use crate::results::WorkflowResult;

/// Flattened view of a [`WorkflowResult`], ready to hand to whatever
/// external report renderer consumes it.
#[derive(Debug, Clone)]
pub struct ReportInputs {
    pub objects_enumerated: u64,
    pub objects_processed: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub loadtest_stages_run: usize,
    pub active_workers: u64,
    pub idle_workers: u64,
    pub queue_depth: u64,
}

impl ReportInputs {
    pub fn from_workflow_result(result: &WorkflowResult) -> Self {
        let (objects_enumerated, objects_processed) = result
            .prewarm
            .as_ref()
            .map(|p| (p.objects_enumerated, p.objects_processed))
            .unwrap_or((0, 0));

        let (total_errors, error_rate) = result
            .analysis
            .as_ref()
            .map(|a| (a.total_errors, a.error_rate))
            .unwrap_or((0, 0.0));

        let loadtest_stages_run = result.loadtest.as_ref().map(|l| l.stages.len()).unwrap_or(0);

        Self {
            objects_enumerated,
            objects_processed,
            total_errors,
            error_rate,
            loadtest_stages_run,
            active_workers: result.worker_activity.active,
            idle_workers: result.worker_activity.idle,
            queue_depth: result.worker_activity.queue_depth,
        }
    }

    /// Minimal default Markdown rendering. A real template engine is a
    /// Non-goal; this exists so callers have something printable.
    pub fn to_markdown(&self) -> String {
        format!(
            "# Pre-warm Run Summary\n\n\
             - Objects enumerated: {}\n\
             - Objects processed: {}\n\
             - Total errors: {} (rate {:.2}%)\n\
             - Load-test stages run: {}\n\
             - Worker activity: {} active, {} idle, {} queued\n",
            self.objects_enumerated,
            self.objects_processed,
            self.total_errors,
            self.error_rate * 100.0,
            self.loadtest_stages_run,
            self.active_workers,
            self.idle_workers,
            self.queue_depth,
        )
    }
}
