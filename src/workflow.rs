//! Workflow coordinator: Prewarm → AnalyzeErrors → LoadTest state
//! machine (§4.7).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::analyzer::analyze;
use crate::collector::MetricCollector;
use crate::loadtest::{LoadTestCandidate, LoadTestConfig, LoadTestDriver};
use crate::prewarm::{PrewarmConfig, PrewarmEngine};
use crate::report::ReportInputs;
use crate::results::{AnalysisResult, LoadTestResult, PrewarmResult, WorkflowResult};

/// Which stages a run should execute, in order. A run always executes a
/// contiguous prefix or the named single stage — skipped stages are
/// simply absent from the result (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    PrewarmOnly,
    AnalyzeOnly,
    LoadTestOnly,
    Full,
}

/// Current stage of an in-progress workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prewarm,
    AnalyzeErrors,
    LoadTest,
    Done,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("a workflow is already running")]
    AlreadyRunning,
    #[error("prewarm stage failed: {0}")]
    PrewarmFailed(String),
    #[error("analyze-only mode requires a prior prewarm result to analyze")]
    MissingPrewarmResult,
    #[error("load-test-only mode requires a URL candidate list")]
    MissingLoadTestInputs,
}

/// Coordinates the three pipeline stages, enforcing continue-on-error
/// transitions (a stage's failures never block the next stage) and
/// cancellation-always-wins semantics (a cancellation observed at any
/// point skips all remaining stages). Only one workflow may run at a
/// time per instance — a second concurrent `run` call is rejected
/// rather than queued.
pub struct WorkflowCoordinator {
    prewarm_engine: Arc<PrewarmEngine>,
    loadtest_driver: Arc<LoadTestDriver>,
    collector: Arc<MetricCollector>,
    running: Arc<AtomicBool>,
    run_lock: Mutex<()>,
}

impl WorkflowCoordinator {
    pub fn new(
        prewarm_engine: Arc<PrewarmEngine>,
        loadtest_driver: Arc<LoadTestDriver>,
        collector: Arc<MetricCollector>,
    ) -> Self {
        Self {
            prewarm_engine,
            loadtest_driver,
            collector,
            running: Arc::new(AtomicBool::new(false)),
            run_lock: Mutex::new(()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run the workflow in `mode`. `prior_prewarm` is required for
    /// `AnalyzeOnly`; `loadtest_candidates` is required for
    /// `LoadTestOnly`.
    pub async fn run(
        &self,
        mode: RunMode,
        prewarm_config: Option<&PrewarmConfig>,
        prior_prewarm: Option<PrewarmResult>,
        loadtest_config: Option<&LoadTestConfig>,
        loadtest_candidates: Option<Vec<LoadTestCandidate>>,
        output_path: Option<&str>,
        cancel: watch::Receiver<bool>,
    ) -> Result<WorkflowResult, WorkflowError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(WorkflowError::AlreadyRunning);
        }
        let _guard = self.run_lock.lock().await;

        let result = self
            .run_inner(
                mode,
                prewarm_config,
                prior_prewarm,
                loadtest_config,
                loadtest_candidates,
                output_path,
                cancel,
            )
            .await;

        self.running.store(false, Ordering::Release);
        result
    }

    async fn run_inner(
        &self,
        mode: RunMode,
        prewarm_config: Option<&PrewarmConfig>,
        prior_prewarm: Option<PrewarmResult>,
        loadtest_config: Option<&LoadTestConfig>,
        loadtest_candidates: Option<Vec<LoadTestCandidate>>,
        output_path: Option<&str>,
        cancel: watch::Receiver<bool>,
    ) -> Result<WorkflowResult, WorkflowError> {
        let mut prewarm_result: Option<PrewarmResult> = prior_prewarm;
        let mut analysis_result: Option<AnalysisResult> = None;
        let mut loadtest_result: Option<LoadTestResult> = None;
        let mut stage = Stage::Prewarm;

        if matches!(mode, RunMode::PrewarmOnly | RunMode::Full) {
            if *cancel.borrow() {
                info!("cancelled before prewarm stage started");
                stage = Stage::Done;
            } else {
                let config = prewarm_config.ok_or_else(|| {
                    WorkflowError::PrewarmFailed("prewarm_config is required for this mode".to_string())
                })?;
                match self.prewarm_engine.run(config, cancel.clone(), None).await {
                    Ok(result) => {
                        prewarm_result = Some(result);
                        stage = Stage::AnalyzeErrors;
                    }
                    Err(e) => {
                        // Continue-on-error: a failed prewarm stage does
                        // not block AnalyzeErrors/LoadTest from running
                        // against whatever partial state exists.
                        warn!(error = %e, "prewarm stage reported an error, continuing per continue-on-error policy");
                        stage = Stage::AnalyzeErrors;
                    }
                }
            }
        } else if matches!(mode, RunMode::AnalyzeOnly) {
            if prewarm_result.is_none() {
                return Err(WorkflowError::MissingPrewarmResult);
            }
            stage = Stage::AnalyzeErrors;
        } else if matches!(mode, RunMode::LoadTestOnly) {
            stage = Stage::LoadTest;
        }

        if stage == Stage::AnalyzeErrors && matches!(mode, RunMode::PrewarmOnly | RunMode::AnalyzeOnly | RunMode::Full) {
            if *cancel.borrow() {
                info!("cancelled before analyze stage started");
                stage = Stage::Done;
            } else if let Some(prewarm) = &prewarm_result {
                analysis_result = Some(analyze(&prewarm.process_results));
                stage = if matches!(mode, RunMode::Full) {
                    Stage::LoadTest
                } else {
                    Stage::Done
                };
            } else {
                stage = Stage::Done;
            }
        }

        if stage == Stage::LoadTest && matches!(mode, RunMode::LoadTestOnly | RunMode::Full) {
            if *cancel.borrow() {
                info!("cancelled before load-test stage started");
            } else {
                let candidates = match (loadtest_candidates, &analysis_result, &prewarm_result) {
                    (Some(c), _, _) => c,
                    (None, Some(_), Some(prewarm)) => prewarm
                        .process_results
                        .iter()
                        .flat_map(|pr| {
                            pr.task_results.iter().map(|tr| LoadTestCandidate {
                                url: tr.task.url.clone(),
                                size_bytes: tr.task.size_bytes,
                            })
                        })
                        .collect(),
                    (None, _, _) => {
                        if matches!(mode, RunMode::LoadTestOnly) {
                            return Err(WorkflowError::MissingLoadTestInputs);
                        }
                        Vec::new()
                    }
                };

                if let Some(config) = loadtest_config {
                    let skip_list = analysis_result
                        .as_ref()
                        .map(|a| a.skip_list.clone())
                        .unwrap_or_default();
                    let result = self
                        .loadtest_driver
                        .run(config, candidates, &skip_list, cancel.clone())
                        .await;
                    loadtest_result = Some(result);
                }
            }
        }

        let worker_activity = self.collector.summary().worker_activity;

        let workflow_result = WorkflowResult {
            prewarm: prewarm_result,
            analysis: analysis_result,
            loadtest: loadtest_result,
            worker_activity,
        };

        if let Some(path) = output_path {
            if let Ok(json) = serde_json::to_string_pretty(&workflow_result) {
                let _ = std::fs::write(path, json);
            }
        }

        Ok(workflow_result)
    }

    /// Assemble the hand-off to the (out-of-scope) report renderer.
    pub fn report_inputs(&self, result: &WorkflowResult) -> ReportInputs {
        ReportInputs::from_workflow_result(result)
    }
}
