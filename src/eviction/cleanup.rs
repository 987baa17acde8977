//! Cleanup of finished deletion tasks and capacity accounting.

use crate::eviction::classify::TaskStatuses;
use crate::eviction::report::{CleanupStep, StepOutcome, TaskCleanupReport};
use crate::store::{TaskStore, TrackingIndex};
use crate::tracking::TrackedRecord;
use crate::types::TaskHandle;
use std::collections::BTreeSet;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct CleanupOutcome {
    pub running_task_count: usize,
    /// Running and succeeded records; none of their pipeline runs may become
    /// a new candidate this cycle.
    pub not_eligible: Vec<TrackedRecord>,
}

fn distinct_handles(records: &[TrackedRecord]) -> Vec<TaskHandle> {
    records
        .iter()
        .filter_map(|record| record.deletion_task.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Remove succeeded tasks together with their tracked records, and failed
/// tasks alone so their records become candidates again. Running and missing
/// tasks are left untouched. A dry run attempts no mutation.
pub async fn cleanup_existing_tasks(
    statuses: &TaskStatuses,
    tasks: &dyn TaskStore,
    index: &dyn TrackingIndex,
    dry_run: bool,
) -> (CleanupOutcome, TaskCleanupReport) {
    let mut report = TaskCleanupReport::default();

    let succeeded_handles = distinct_handles(&statuses.succeeded_tasks.pipeline_runs);
    if !succeeded_handles.is_empty() {
        info!(tasks = succeeded_handles.len(), dry_run, "Deleting succeeded tasks");
        let response = if dry_run {
            StepOutcome::Skipped
        } else {
            tasks.delete_task_records(&succeeded_handles).await.into()
        };
        report.succeeded = Some(CleanupStep {
            tasks: succeeded_handles,
            pipeline_runs: Vec::new(),
            response,
        });

        let records = &statuses.succeeded_tasks.pipeline_runs;
        info!(records = records.len(), dry_run, "Deleting succeeded pipeline runs");
        let response = if dry_run {
            StepOutcome::Skipped
        } else {
            index.delete_tracked_records(records).await.into()
        };
        report.pipeline_runs_deleted = Some(CleanupStep {
            tasks: Vec::new(),
            pipeline_runs: records.clone(),
            response,
        });
    }

    let failed_handles = distinct_handles(&statuses.failed_tasks.pipeline_runs);
    if !failed_handles.is_empty() {
        info!(tasks = failed_handles.len(), dry_run, "Deleting failed tasks");
        let response = if dry_run {
            StepOutcome::Skipped
        } else {
            tasks.delete_task_records(&failed_handles).await.into()
        };
        report.failed = Some(CleanupStep {
            tasks: failed_handles,
            pipeline_runs: Vec::new(),
            response,
        });
    }

    let not_eligible = statuses
        .running_tasks
        .pipeline_runs
        .iter()
        .chain(statuses.succeeded_tasks.pipeline_runs.iter())
        .cloned()
        .collect();

    (
        CleanupOutcome {
            running_task_count: statuses.running_tasks.tasks.len(),
            not_eligible,
        },
        report,
    )
}

/// Number of new deletion tasks that may start; never negative.
pub fn check_capacity(max_concurrent: usize, running_task_count: usize) -> usize {
    max_concurrent.saturating_sub(running_task_count)
}
