//! Collaborator stores
//!
//! The controller talks to three externally owned stores: the relational store
//! holding canonical pipeline runs, the tracking side of the search index, and
//! the index engine's asynchronous task API. Each is a trait so the
//! reconciliation core can run against the real backends or the in-memory one.

use crate::error::StoreError;
use crate::tracking::{ExpiredPair, TrackedRecord};
use crate::types::{BackgroundId, PipelineRunId, TaskHandle};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

pub mod memory;
pub mod mysql;
pub mod opensearch;

pub use memory::InMemoryStores;
pub use mysql::MySqlCanonicalStore;
pub use opensearch::OpenSearchClient;

/// Selects the derived rows (and tracked records) a single deletion batch covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionFilter {
    pub pipeline_run_ids: Vec<PipelineRunId>,
    /// Present for background-scoped eviction only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_id: Option<BackgroundId>,
}

impl EvictionFilter {
    pub fn matches(&self, pipeline_run_id: &PipelineRunId, background_id: &BackgroundId) -> bool {
        self.pipeline_run_ids.contains(pipeline_run_id)
            && self
                .background_id
                .as_ref()
                .map_or(true, |scoped| scoped == background_id)
    }
}

/// Outcome of a mutating call that succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MutationSummary {
    pub affected: u64,
}

/// A deletion task the engine still reports as running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunningTask {
    pub handle: TaskHandle,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running_time_in_nanos: Option<u64>,
}

/// Task identity as recorded in a completed task document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub node: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TaskResponse {
    #[serde(default)]
    pub failures: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// A task document the engine wrote once the task finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTask {
    #[serde(default)]
    pub completed: bool,
    pub task: TaskInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<TaskResponse>,
}

impl CompletedTask {
    pub fn handle(&self) -> TaskHandle {
        TaskHandle::new(self.task.node.clone(), self.task.id)
    }

    /// Completed, without an error, and with zero failures in its response.
    pub fn is_succeeded(&self) -> bool {
        self.completed
            && self.error.is_none()
            && self
                .response
                .as_ref()
                .map_or(true, |response| response.failures.is_empty())
    }
}

/// Canonical (source of truth) pipeline runs.
#[async_trait]
pub trait CanonicalStore: Send + Sync {
    async fn list_all_pipeline_run_ids(&self) -> Result<HashSet<PipelineRunId>, StoreError>;
}

/// Tracking side of the search index.
#[async_trait]
pub trait TrackingIndex: Send + Sync {
    /// Tracked records that carry a `deletion_task` handle.
    async fn list_tracked_records_with_active_deletion(
        &self,
    ) -> Result<Vec<TrackedRecord>, StoreError>;

    /// Every pipeline run id present in the tracking index, one page at a time.
    /// Ids repeat once per background.
    fn stream_tracked_pipeline_run_ids(&self) -> BoxStream<'_, Result<PipelineRunId, StoreError>>;

    async fn find_expired(&self, ttl_days: u32) -> Result<Vec<ExpiredPair>, StoreError>;

    /// Set `deletion_task` and `is_complete=false` on every record the filter covers.
    async fn tag_records(
        &self,
        handle: &TaskHandle,
        filter: &EvictionFilter,
    ) -> Result<MutationSummary, StoreError>;

    async fn delete_tracked_records(
        &self,
        records: &[TrackedRecord],
    ) -> Result<MutationSummary, StoreError>;
}

/// Asynchronous task API of the index engine.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn list_running_tasks(&self, handles: &[TaskHandle])
        -> Result<Vec<RunningTask>, StoreError>;

    /// Every top-level deletion task running against the derived index,
    /// whether or not a tracked record references it.
    async fn list_running_deletion_tasks(&self) -> Result<Vec<RunningTask>, StoreError>;

    async fn list_completed_tasks(
        &self,
        handles: &[TaskHandle],
    ) -> Result<Vec<CompletedTask>, StoreError>;

    async fn delete_task_records(&self, handles: &[TaskHandle])
        -> Result<MutationSummary, StoreError>;

    /// Start a throttled delete of the derived rows the filter covers.
    /// Returns as soon as the engine has accepted the task.
    async fn submit_bulk_delete(
        &self,
        filter: &EvictionFilter,
        requests_per_second: u32,
    ) -> Result<TaskHandle, StoreError>;
}
