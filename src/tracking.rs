//! Tracked records: one document per (pipeline run, background) pair in the
//! tracking index, describing derived data that may be evicted.

use crate::types::{BackgroundId, PipelineRunId, TaskHandle};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedRecord {
    pub pipeline_run_id: PipelineRunId,
    pub background_id: BackgroundId,
    #[serde(default)]
    pub is_complete: bool,
    /// In-flight or last attempted deletion for this pair's derived data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_task: Option<TaskHandle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_at: Option<DateTime<Utc>>,
}

impl TrackedRecord {
    pub fn new(pipeline_run_id: impl Into<PipelineRunId>, background_id: impl Into<BackgroundId>) -> Self {
        Self {
            pipeline_run_id: pipeline_run_id.into(),
            background_id: background_id.into(),
            is_complete: true,
            deletion_task: None,
            created_at: None,
            last_read_at: None,
        }
    }

    pub fn with_deletion_task(mut self, handle: TaskHandle) -> Self {
        self.deletion_task = Some(handle);
        self
    }

    /// Document id in the tracking index.
    pub fn document_id(&self) -> String {
        format!("{}_{}", self.pipeline_run_id, self.background_id)
    }

    /// Whether the record is past `ttl_days` at `now`.
    ///
    /// Last access wins when present; a never-read record ages from creation.
    /// Both bounds are truncated to the day, matching the index's `now-{ttl}d/d`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl_days: u32) -> bool {
        let cutoff = (now - chrono::Duration::days(i64::from(ttl_days)))
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|naive| naive.and_utc());
        let Some(cutoff) = cutoff else {
            return false;
        };
        match (self.last_read_at, self.created_at) {
            (Some(last_read), _) => last_read < cutoff,
            (None, Some(created)) => created < cutoff,
            (None, None) => false,
        }
    }
}

/// A (pipeline run, background) pair found past its retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiredPair {
    pub pipeline_run_id: PipelineRunId,
    pub background_id: BackgroundId,
}
