//! Batch admission
//!
//! Candidates become [`EvictionPlan`]s, plans are cut into fixed-size batches,
//! and [`admit`] submits batches in order while capacity lasts. Capacity is a
//! plain value handed from one call to the next.

use crate::eviction::report::{EvictionCandidates, EvictionStarted, StepOutcome, SubmitOutcome};
use crate::store::{EvictionFilter, TaskStore, TrackingIndex};
use crate::types::{BackgroundId, PipelineRunId};
use tracing::{info, warn};

/// Number of deletion tasks that may still start this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Capacity(usize);

impl Capacity {
    pub fn new(slots: usize) -> Self {
        Capacity(slots)
    }

    pub fn get(self) -> usize {
        self.0
    }

    pub fn is_exhausted(self) -> bool {
        self.0 == 0
    }

    /// Charge `batches` against the remainder, stopping at zero.
    pub fn consume(self, batches: usize) -> Self {
        Capacity(self.0.saturating_sub(batches))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionKind {
    ByPipelineRun,
    ByPipelineRunAndBackground,
}

impl EvictionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EvictionKind::ByPipelineRun => "by_pipeline_run_id",
            EvictionKind::ByPipelineRunAndBackground => "by_pipeline_run_id_and_background_id",
        }
    }
}

/// Pipeline runs to evict, either entirely or for one background only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionPlan {
    ByPipelineRun {
        pipeline_run_ids: Vec<PipelineRunId>,
    },
    ByPipelineRunAndBackground {
        background_id: BackgroundId,
        pipeline_run_ids: Vec<PipelineRunId>,
    },
}

impl EvictionPlan {
    pub fn kind(&self) -> EvictionKind {
        match self {
            EvictionPlan::ByPipelineRun { .. } => EvictionKind::ByPipelineRun,
            EvictionPlan::ByPipelineRunAndBackground { .. } => {
                EvictionKind::ByPipelineRunAndBackground
            }
        }
    }

    pub fn background_id(&self) -> Option<&BackgroundId> {
        match self {
            EvictionPlan::ByPipelineRun { .. } => None,
            EvictionPlan::ByPipelineRunAndBackground { background_id, .. } => Some(background_id),
        }
    }

    pub fn pipeline_run_ids(&self) -> &[PipelineRunId] {
        match self {
            EvictionPlan::ByPipelineRun { pipeline_run_ids }
            | EvictionPlan::ByPipelineRunAndBackground {
                pipeline_run_ids, ..
            } => pipeline_run_ids,
        }
    }

    /// Consecutive batches of at most `batch_size` ids; the last may be shorter.
    pub fn batches(&self, batch_size: usize) -> impl Iterator<Item = EvictionFilter> + '_ {
        let background_id = self.background_id().cloned();
        self.pipeline_run_ids()
            .chunks(batch_size.max(1))
            .map(move |chunk| EvictionFilter {
                pipeline_run_ids: chunk.to_vec(),
                background_id: background_id.clone(),
            })
    }
}

/// Pipeline-scoped plan first, then one plan per background in key order.
/// Empty groups produce no plan.
pub fn plans_from_candidates(candidates: &EvictionCandidates) -> Vec<EvictionPlan> {
    let mut plans = Vec::new();
    if !candidates.by_pipeline.is_empty() {
        plans.push(EvictionPlan::ByPipelineRun {
            pipeline_run_ids: candidates.by_pipeline.clone(),
        });
    }
    for (background_id, pipeline_run_ids) in &candidates.by_pipeline_and_background_id {
        if pipeline_run_ids.is_empty() {
            continue;
        }
        plans.push(EvictionPlan::ByPipelineRunAndBackground {
            background_id: background_id.clone(),
            pipeline_run_ids: pipeline_run_ids.clone(),
        });
    }
    plans
}

#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub remaining: Capacity,
    pub started: Vec<EvictionStarted>,
}

/// Submit the plan's batches in order, one per unit of capacity, tagging the
/// covered records after each accepted submission.
///
/// Every batch of the plan is charged against capacity whether or not it was
/// admitted, so the remainder only reaches later plans if this one fit.
pub async fn admit(
    plan: &EvictionPlan,
    capacity: Capacity,
    batch_size: usize,
    requests_per_second: u32,
    tasks: &dyn TaskStore,
    index: &dyn TrackingIndex,
) -> Admission {
    let batches: Vec<EvictionFilter> = plan.batches(batch_size).collect();
    let mut started = Vec::new();

    for filter in batches.iter().take(capacity.get()) {
        let (start_eviction_response, set_task_id_response) =
            match tasks.submit_bulk_delete(filter, requests_per_second).await {
                Ok(handle) => {
                    let tagged: StepOutcome = index.tag_records(&handle, filter).await.into();
                    if tagged.is_error() {
                        warn!(task = %handle, "Eviction started but tagging records failed");
                    }
                    (SubmitOutcome::Task(handle), Some(tagged))
                }
                Err(e) => {
                    warn!(error = %e, ids = filter.pipeline_run_ids.len(), "Eviction start failed");
                    (SubmitOutcome::Error(e.to_string()), None)
                }
            };
        started.push(EvictionStarted {
            background_id: filter.background_id.clone(),
            pipeline_run_ids: filter.pipeline_run_ids.clone(),
            start_eviction_response,
            set_task_id_response,
        });
    }

    let remaining = capacity.consume(batches.len());
    info!(
        kind = plan.kind().as_str(),
        batches = batches.len(),
        started = started.len(),
        remaining = remaining.get(),
        "Admitted eviction batches"
    );
    Admission { remaining, started }
}
