//! Cycle report
//!
//! Every phase hands its outcome to the report, which logs it and records
//! the warnings and errors the phase implies. The report has the same shape
//! whether or not the cycle was a dry run.

use crate::error::{EvictionError, StoreError};
use crate::eviction::classify::TaskStatuses;
use crate::eviction::plan::EvictionKind;
use crate::store::{MutationSummary, RunningTask};
use crate::tracking::TrackedRecord;
use crate::types::{BackgroundId, PipelineRunId, TaskHandle};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// A warning or error recorded during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub message: String,
    pub details: Value,
}

/// Tasks in one lifecycle state plus the tracked records that reference them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskPartition<T> {
    pub tasks: Vec<T>,
    pub pipeline_runs: Vec<TrackedRecord>,
}

impl<T> Default for TaskPartition<T> {
    fn default() -> Self {
        Self {
            tasks: Vec::new(),
            pipeline_runs: Vec::new(),
        }
    }
}

/// Result of one mutating store call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Ok(MutationSummary),
    Error(String),
    /// Not attempted because the cycle is a dry run.
    Skipped,
}

impl StepOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, StepOutcome::Error(_))
    }
}

impl From<Result<MutationSummary, StoreError>> for StepOutcome {
    fn from(result: Result<MutationSummary, StoreError>) -> Self {
        match result {
            Ok(summary) => StepOutcome::Ok(summary),
            Err(e) => StepOutcome::Error(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupStep {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskHandle>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pipeline_runs: Vec<TrackedRecord>,
    pub response: StepOutcome,
}

/// A step is `None` when there was nothing for it to do.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskCleanupReport {
    pub succeeded: Option<CleanupStep>,
    pub failed: Option<CleanupStep>,
    pub pipeline_runs_deleted: Option<CleanupStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    Task(TaskHandle),
    Error(String),
}

/// One admitted batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvictionStarted {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_id: Option<BackgroundId>,
    pub pipeline_run_ids: Vec<PipelineRunId>,
    pub start_eviction_response: SubmitOutcome,
    /// `None` when the submission failed and tagging was never attempted.
    pub set_task_id_response: Option<StepOutcome>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvictionsStartedReport {
    pub by_pipeline_run_id: Vec<EvictionStarted>,
    pub by_pipeline_run_id_and_background_id: Vec<EvictionStarted>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionCandidates {
    /// Pipeline runs gone from the relational store.
    pub by_pipeline: Vec<PipelineRunId>,
    /// Expired pipeline runs keyed by background.
    pub by_pipeline_and_background_id: BTreeMap<BackgroundId, Vec<PipelineRunId>>,
}

impl EvictionCandidates {
    pub fn is_empty(&self) -> bool {
        self.by_pipeline.is_empty() && self.by_pipeline_and_background_id.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub params: Value,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub task_statuses: TaskStatuses,
    /// Running deletion tasks no tracked record references.
    pub untracked_tasks: Vec<RunningTask>,
    pub task_cleanup: TaskCleanupReport,
    pub capacity: usize,
    pub eviction_candidates: EvictionCandidates,
    pub evictions_started: EvictionsStartedReport,
    pub warnings: Vec<Issue>,
    pub errors: Vec<Issue>,
}

fn to_details<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

impl CycleReport {
    pub fn new(params: Value, dry_run: bool) -> Self {
        Self {
            params,
            dry_run,
            started_at: Utc::now(),
            finished_at: None,
            task_statuses: TaskStatuses::default(),
            untracked_tasks: Vec::new(),
            task_cleanup: TaskCleanupReport::default(),
            capacity: 0,
            eviction_candidates: EvictionCandidates::default(),
            evictions_started: EvictionsStartedReport::default(),
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn report_task_statuses(&mut self, statuses: TaskStatuses) {
        info!(
            running = statuses.running_tasks.tasks.len(),
            missing = statuses.missing_tasks.tasks.len(),
            failed = statuses.failed_tasks.tasks.len(),
            succeeded = statuses.succeeded_tasks.tasks.len(),
            "Task report"
        );

        if !statuses.failed_tasks.tasks.is_empty() {
            self.record_error("Failed tasks found", to_details(&statuses.failed_tasks));
        }
        if !statuses.missing_tasks.tasks.is_empty() {
            self.record_error("Missing tasks found", to_details(&statuses.missing_tasks));
        }
        self.task_statuses = statuses;
    }

    /// Tasks started by a cycle that never got to tag its records. They hold
    /// capacity like any other running task.
    pub fn report_untracked_tasks(&mut self, tasks: Vec<RunningTask>) {
        if !tasks.is_empty() {
            info!(untracked = tasks.len(), "Untracked task report");
            self.warn("Untracked running tasks found", to_details(&tasks));
        }
        self.untracked_tasks = tasks;
    }

    pub fn report_task_cleanup(&mut self, cleanup: TaskCleanupReport) {
        info!(
            succeeded = cleanup.succeeded.is_some(),
            failed = cleanup.failed.is_some(),
            pipeline_runs_deleted = cleanup.pipeline_runs_deleted.is_some(),
            "Task cleanup report"
        );

        for (step, label) in [
            (&cleanup.succeeded, "Succeeded task deletion"),
            (&cleanup.failed, "Failed task deletion"),
            (&cleanup.pipeline_runs_deleted, "Pipeline_run cleanup"),
        ] {
            if let Some(step) = step.as_ref().filter(|step| step.response.is_error()) {
                self.warn(format!("{} failed", label), to_details(step));
            }
        }
        self.task_cleanup = cleanup;
    }

    pub fn report_capacity(&mut self, capacity: usize, max_concurrent: usize) {
        if capacity == 0 {
            info!(
                max_concurrent,
                "Max deletion task concurrency reached. No tasks started."
            );
        } else {
            info!(
                max_concurrent,
                capacity, "Max deletion task concurrency not reached. Starting tasks..."
            );
        }
        self.capacity = capacity;
    }

    /// Capacity when the state of existing tasks could not be read.
    pub fn report_unknown_task_state(&mut self) {
        warn!("Existing deletion tasks could not be read. No tasks started.");
        self.capacity = 0;
    }

    pub fn report_eviction_candidates(&mut self, candidates: EvictionCandidates) {
        info!(
            by_pipeline = candidates.by_pipeline.len(),
            by_pipeline_and_background_id = candidates.by_pipeline_and_background_id.len(),
            "Deletion candidates"
        );
        self.eviction_candidates = candidates;
    }

    pub fn report_evictions_started(&mut self, kind: EvictionKind, started: Vec<EvictionStarted>) {
        info!(kind = kind.as_str(), count = started.len(), "Evictions started");

        for eviction in &started {
            if matches!(eviction.start_eviction_response, SubmitOutcome::Error(_)) {
                self.record_error("Eviction start failed", to_details(eviction));
            } else if eviction
                .set_task_id_response
                .as_ref()
                .is_some_and(StepOutcome::is_error)
            {
                self.record_error(
                    "Task ID set failed after eviction started",
                    to_details(eviction),
                );
            }
        }

        match kind {
            EvictionKind::ByPipelineRun => self.evictions_started.by_pipeline_run_id = started,
            EvictionKind::ByPipelineRunAndBackground => {
                self.evictions_started.by_pipeline_run_id_and_background_id = started
            }
        }
    }

    /// Record a store failure that kept a whole phase from running.
    pub fn record_store_failure(&mut self, message: &str, err: &StoreError) {
        error!(error = %err, "{}", message);
        self.record_error(message, json!({ "error": err.to_string() }));
    }

    pub fn record_error(&mut self, message: impl Into<String>, details: Value) {
        self.errors.push(Issue {
            message: message.into(),
            details,
        });
    }

    pub fn warn(&mut self, message: impl Into<String>, details: Value) {
        self.warnings.push(Issue {
            message: message.into(),
            details,
        });
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty() && self.errors.is_empty()
    }
}

/// Close the report. A cycle that recorded any warning or error fails here,
/// and only here.
pub fn deliver_final_report(mut report: CycleReport) -> Result<CycleReport, EvictionError> {
    report.finished_at = Some(Utc::now());
    if report.is_clean() {
        info!(capacity = report.capacity, "Eviction cycle finished");
        return Ok(report);
    }

    for issue in &report.warnings {
        warn!(details = %issue.details, "{}", issue.message);
    }
    for issue in &report.errors {
        error!(details = %issue.details, "{}", issue.message);
    }
    Err(EvictionError::CycleFailed {
        warnings: report.warnings.len(),
        errors: report.errors.len(),
        report: Box::new(report),
    })
}
