//! In-memory stores
//!
//! A single value that plays all three collaborator roles, holding canonical
//! ids, tracked records and engine tasks behind one lock. Every mutating call
//! is appended to a call log, and any operation can be made to fail, so cycles
//! can be driven and inspected without a cluster or a database.

use crate::error::StoreError;
use crate::store::{
    CanonicalStore, CompletedTask, EvictionFilter, MutationSummary, RunningTask, TaskInfo,
    TaskResponse, TaskStore, TrackingIndex,
};
use crate::tracking::{ExpiredPair, TrackedRecord};
use crate::types::{PipelineRunId, TaskHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

const MEMORY_NODE: &str = "memory-node";

/// Store operations, used to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListCanonicalIds,
    ListActiveDeletions,
    StreamTrackedIds,
    FindExpired,
    TagRecords,
    DeleteTrackedRecords,
    ListRunningTasks,
    ListRunningDeletionTasks,
    ListCompletedTasks,
    DeleteTaskRecords,
    SubmitBulkDelete,
}

/// A mutating call as it reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationCall {
    TagRecords {
        handle: TaskHandle,
        filter: EvictionFilter,
    },
    DeleteTrackedRecords {
        document_ids: Vec<String>,
    },
    DeleteTaskRecords {
        handles: Vec<TaskHandle>,
    },
    SubmitBulkDelete {
        filter: EvictionFilter,
        requests_per_second: u32,
    },
}

#[derive(Default)]
struct State {
    canonical: HashSet<PipelineRunId>,
    records: Vec<TrackedRecord>,
    running: BTreeMap<TaskHandle, EvictionFilter>,
    completed: BTreeMap<TaskHandle, CompletedTask>,
    next_task_id: u64,
    failing: HashSet<Operation>,
    calls: Vec<MutationCall>,
    now: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct InMemoryStores {
    state: Mutex<State>,
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_canonical(&self, ids: impl IntoIterator<Item = PipelineRunId>) {
        self.state.lock().canonical.extend(ids);
    }

    pub fn add_record(&self, record: TrackedRecord) {
        self.state.lock().records.push(record);
    }

    pub fn records(&self) -> Vec<TrackedRecord> {
        self.state.lock().records.clone()
    }

    /// Clock used for expiry; defaults to the wall clock.
    pub fn set_now(&self, now: DateTime<Utc>) {
        self.state.lock().now = Some(now);
    }

    pub fn fail(&self, operation: Operation) {
        self.state.lock().failing.insert(operation);
    }

    pub fn recover(&self, operation: Operation) {
        self.state.lock().failing.remove(&operation);
    }

    pub fn calls(&self) -> Vec<MutationCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Register a task the engine reports as running.
    pub fn add_running_task(&self, handle: TaskHandle, filter: EvictionFilter) {
        self.state.lock().running.insert(handle, filter);
    }

    /// Register a finished task document.
    pub fn add_completed_task(&self, task: CompletedTask) {
        self.state.lock().completed.insert(task.handle(), task);
    }

    pub fn running_handles(&self) -> Vec<TaskHandle> {
        self.state.lock().running.keys().cloned().collect()
    }

    pub fn completed_handles(&self) -> Vec<TaskHandle> {
        self.state.lock().completed.keys().cloned().collect()
    }

    /// Move a running task to the completed set, failing it when `failures` is non-empty.
    pub fn finish_task(&self, handle: &TaskHandle, failures: Vec<Value>) -> bool {
        let mut state = self.state.lock();
        if state.running.remove(handle).is_none() {
            return false;
        }
        let task = completed_task(handle, failures);
        state.completed.insert(handle.clone(), task);
        true
    }

    /// Drop every trace of a task, as when the engine loses its record.
    pub fn forget_task(&self, handle: &TaskHandle) {
        let mut state = self.state.lock();
        state.running.remove(handle);
        state.completed.remove(handle);
    }

    fn check(state: &State, operation: Operation) -> Result<(), StoreError> {
        if state.failing.contains(&operation) {
            return Err(StoreError::Http(format!("injected failure: {:?}", operation)));
        }
        Ok(())
    }
}

fn running_task(handle: &TaskHandle) -> RunningTask {
    RunningTask {
        handle: handle.clone(),
        action: "indices:data/write/delete/byquery".to_string(),
        description: None,
        running_time_in_nanos: None,
    }
}

/// Completed task document in the engine's format.
pub fn completed_task(handle: &TaskHandle, failures: Vec<Value>) -> CompletedTask {
    CompletedTask {
        completed: true,
        task: TaskInfo {
            node: handle.node.clone(),
            id: handle.id,
            action: Some("indices:data/write/delete/byquery".to_string()),
            description: None,
        },
        error: None,
        response: Some(TaskResponse {
            failures,
            deleted: None,
            total: None,
        }),
    }
}

#[async_trait]
impl CanonicalStore for InMemoryStores {
    async fn list_all_pipeline_run_ids(&self) -> Result<HashSet<PipelineRunId>, StoreError> {
        let state = self.state.lock();
        Self::check(&state, Operation::ListCanonicalIds)?;
        Ok(state.canonical.clone())
    }
}

#[async_trait]
impl TrackingIndex for InMemoryStores {
    async fn list_tracked_records_with_active_deletion(
        &self,
    ) -> Result<Vec<TrackedRecord>, StoreError> {
        let state = self.state.lock();
        Self::check(&state, Operation::ListActiveDeletions)?;
        Ok(state
            .records
            .iter()
            .filter(|record| record.deletion_task.is_some())
            .cloned()
            .collect())
    }

    fn stream_tracked_pipeline_run_ids(&self) -> BoxStream<'_, Result<PipelineRunId, StoreError>> {
        let state = self.state.lock();
        if let Err(e) = Self::check(&state, Operation::StreamTrackedIds) {
            return stream::once(async move { Err(e) }).boxed();
        }
        let ids: Vec<Result<PipelineRunId, StoreError>> = state
            .records
            .iter()
            .map(|record| Ok(record.pipeline_run_id.clone()))
            .collect();
        stream::iter(ids).boxed()
    }

    async fn find_expired(&self, ttl_days: u32) -> Result<Vec<ExpiredPair>, StoreError> {
        let state = self.state.lock();
        Self::check(&state, Operation::FindExpired)?;
        let now = state.now.unwrap_or_else(Utc::now);
        Ok(state
            .records
            .iter()
            .filter(|record| record.is_expired(now, ttl_days))
            .map(|record| ExpiredPair {
                pipeline_run_id: record.pipeline_run_id.clone(),
                background_id: record.background_id.clone(),
            })
            .collect())
    }

    async fn tag_records(
        &self,
        handle: &TaskHandle,
        filter: &EvictionFilter,
    ) -> Result<MutationSummary, StoreError> {
        let mut state = self.state.lock();
        state.calls.push(MutationCall::TagRecords {
            handle: handle.clone(),
            filter: filter.clone(),
        });
        Self::check(&state, Operation::TagRecords)?;

        let mut affected = 0;
        for record in state
            .records
            .iter_mut()
            .filter(|record| filter.matches(&record.pipeline_run_id, &record.background_id))
        {
            record.deletion_task = Some(handle.clone());
            record.is_complete = false;
            affected += 1;
        }
        Ok(MutationSummary { affected })
    }

    async fn delete_tracked_records(
        &self,
        records: &[TrackedRecord],
    ) -> Result<MutationSummary, StoreError> {
        let mut state = self.state.lock();
        let document_ids: Vec<String> = records.iter().map(TrackedRecord::document_id).collect();
        state.calls.push(MutationCall::DeleteTrackedRecords {
            document_ids: document_ids.clone(),
        });
        Self::check(&state, Operation::DeleteTrackedRecords)?;

        let before = state.records.len();
        state
            .records
            .retain(|record| !document_ids.contains(&record.document_id()));
        Ok(MutationSummary {
            affected: (before - state.records.len()) as u64,
        })
    }
}

#[async_trait]
impl TaskStore for InMemoryStores {
    async fn list_running_tasks(
        &self,
        handles: &[TaskHandle],
    ) -> Result<Vec<RunningTask>, StoreError> {
        let state = self.state.lock();
        Self::check(&state, Operation::ListRunningTasks)?;
        Ok(state
            .running
            .keys()
            .filter(|handle| handles.contains(handle))
            .map(running_task)
            .collect())
    }

    async fn list_running_deletion_tasks(&self) -> Result<Vec<RunningTask>, StoreError> {
        let state = self.state.lock();
        Self::check(&state, Operation::ListRunningDeletionTasks)?;
        Ok(state.running.keys().map(running_task).collect())
    }

    async fn list_completed_tasks(
        &self,
        handles: &[TaskHandle],
    ) -> Result<Vec<CompletedTask>, StoreError> {
        let state = self.state.lock();
        Self::check(&state, Operation::ListCompletedTasks)?;
        Ok(state
            .completed
            .iter()
            .filter(|(handle, _)| handles.contains(handle))
            .map(|(_, task)| task.clone())
            .collect())
    }

    async fn delete_task_records(
        &self,
        handles: &[TaskHandle],
    ) -> Result<MutationSummary, StoreError> {
        let mut state = self.state.lock();
        state.calls.push(MutationCall::DeleteTaskRecords {
            handles: handles.to_vec(),
        });
        Self::check(&state, Operation::DeleteTaskRecords)?;

        let before = state.completed.len();
        state.completed.retain(|handle, _| !handles.contains(handle));
        Ok(MutationSummary {
            affected: (before - state.completed.len()) as u64,
        })
    }

    async fn submit_bulk_delete(
        &self,
        filter: &EvictionFilter,
        requests_per_second: u32,
    ) -> Result<TaskHandle, StoreError> {
        let mut state = self.state.lock();
        state.calls.push(MutationCall::SubmitBulkDelete {
            filter: filter.clone(),
            requests_per_second,
        });
        Self::check(&state, Operation::SubmitBulkDelete)?;

        state.next_task_id += 1;
        let handle = TaskHandle::new(MEMORY_NODE, state.next_task_id);
        state.running.insert(handle.clone(), filter.clone());
        Ok(handle)
    }
}
