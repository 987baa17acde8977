//! Task status classification
//!
//! Partitions the deletion tasks referenced by tracked records into running,
//! missing, succeeded and failed. Read-only against the task store.

use crate::error::StoreError;
use crate::eviction::report::TaskPartition;
use crate::store::{CompletedTask, RunningTask, TaskStore};
use crate::tracking::TrackedRecord;
use crate::types::TaskHandle;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskStatuses {
    pub running_tasks: TaskPartition<RunningTask>,
    pub missing_tasks: TaskPartition<TaskHandle>,
    pub succeeded_tasks: TaskPartition<CompletedTask>,
    pub failed_tasks: TaskPartition<CompletedTask>,
}

impl TaskStatuses {
    /// Total number of records across all four partitions.
    pub fn record_count(&self) -> usize {
        self.running_tasks.pipeline_runs.len()
            + self.missing_tasks.pipeline_runs.len()
            + self.succeeded_tasks.pipeline_runs.len()
            + self.failed_tasks.pipeline_runs.len()
    }
}

/// Classify every record that carries a `deletion_task`; other records are dropped.
///
/// Running status wins over any completed document for the same handle. A
/// handle found by neither lookup is missing.
pub async fn classify(
    records: Vec<TrackedRecord>,
    tasks: &dyn TaskStore,
) -> Result<TaskStatuses, StoreError> {
    let records: Vec<TrackedRecord> = records
        .into_iter()
        .filter(|record| record.deletion_task.is_some())
        .collect();

    let handles: Vec<TaskHandle> = records
        .iter()
        .filter_map(|record| record.deletion_task.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if handles.is_empty() {
        return Ok(TaskStatuses::default());
    }

    let running = tasks.list_running_tasks(&handles).await?;
    let running_handles: HashSet<TaskHandle> =
        running.iter().map(|task| task.handle.clone()).collect();

    let remaining: Vec<TaskHandle> = handles
        .iter()
        .filter(|handle| !running_handles.contains(*handle))
        .cloned()
        .collect();
    let completed = if remaining.is_empty() {
        Vec::new()
    } else {
        tasks.list_completed_tasks(&remaining).await?
    };

    let mut statuses = TaskStatuses::default();
    let mut succeeded_handles = HashSet::new();
    let mut failed_handles = HashSet::new();
    for task in completed {
        let handle = task.handle();
        if !remaining.contains(&handle)
            || succeeded_handles.contains(&handle)
            || failed_handles.contains(&handle)
        {
            continue;
        }
        if task.is_succeeded() {
            succeeded_handles.insert(handle);
            statuses.succeeded_tasks.tasks.push(task);
        } else {
            failed_handles.insert(handle);
            statuses.failed_tasks.tasks.push(task);
        }
    }

    statuses.missing_tasks.tasks = remaining
        .into_iter()
        .filter(|handle| !succeeded_handles.contains(handle) && !failed_handles.contains(handle))
        .collect();
    statuses.running_tasks.tasks = running
        .into_iter()
        .filter(|task| handles.contains(&task.handle))
        .collect();

    for record in records {
        let Some(handle) = record.deletion_task.as_ref() else {
            continue;
        };
        let partition = if running_handles.contains(handle) {
            &mut statuses.running_tasks.pipeline_runs
        } else if succeeded_handles.contains(handle) {
            &mut statuses.succeeded_tasks.pipeline_runs
        } else if failed_handles.contains(handle) {
            &mut statuses.failed_tasks.pipeline_runs
        } else {
            &mut statuses.missing_tasks.pipeline_runs
        };
        partition.push(record);
    }

    debug!(
        handles = handles.len(),
        records = statuses.record_count(),
        "Classified deletion tasks"
    );
    Ok(statuses)
}
