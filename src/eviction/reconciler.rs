//! One reconciliation cycle over the three stores.

use crate::config::EvictionSettings;
use crate::error::EvictionError;
use crate::eviction::classify::classify;
use crate::eviction::cleanup::{check_capacity, cleanup_existing_tasks, CleanupOutcome};
use crate::eviction::detect::{find_expired_by_background, find_orphans};
use crate::eviction::plan::{admit, plans_from_candidates, Capacity, EvictionKind};
use crate::eviction::report::{deliver_final_report, CycleReport, EvictionCandidates};
use crate::store::{CanonicalStore, RunningTask, TaskStore, TrackingIndex};
use crate::types::{PipelineRunId, TaskHandle};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};

/// What the cleanup phase leaves for admission.
struct ExistingTasks {
    cleanup: CleanupOutcome,
    /// Running deletion tasks no record references; they still take capacity.
    untracked_task_count: usize,
}

pub struct Reconciler {
    canonical: Arc<dyn CanonicalStore>,
    index: Arc<dyn TrackingIndex>,
    tasks: Arc<dyn TaskStore>,
    settings: EvictionSettings,
    params: Value,
}

impl Reconciler {
    pub fn new(
        canonical: Arc<dyn CanonicalStore>,
        index: Arc<dyn TrackingIndex>,
        tasks: Arc<dyn TaskStore>,
        settings: EvictionSettings,
    ) -> Self {
        let params = serde_json::to_value(&settings).unwrap_or(Value::Null);
        Self {
            canonical,
            index,
            tasks,
            settings,
            params,
        }
    }

    /// Parameters copied into every report.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    /// Run a cycle and fail if it recorded any warning or error.
    pub async fn run(&self, dry_run: bool) -> Result<CycleReport, EvictionError> {
        deliver_final_report(self.run_cycle(dry_run).await)
    }

    /// Run a cycle. Store failures end up in the report; nothing here returns early
    /// with an error.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self, dry_run: bool) -> CycleReport {
        let mut report = CycleReport::new(self.params.clone(), dry_run);

        info!("Discovering and handling existing deletion tasks");
        let Some(existing) = self.handle_existing_tasks(&mut report, dry_run).await else {
            report.report_unknown_task_state();
            return report;
        };

        let capacity = check_capacity(
            self.settings.max_concurrent_deletion_tasks,
            existing.cleanup.running_task_count + existing.untracked_task_count,
        );
        report.report_capacity(capacity, self.settings.max_concurrent_deletion_tasks);
        if capacity == 0 {
            return report;
        }

        info!("Discovering eviction candidates");
        // Missing-task runs stay out too: they are reported, not resubmitted.
        let being_deleted: HashSet<PipelineRunId> = existing
            .cleanup
            .not_eligible
            .iter()
            .chain(report.task_statuses.missing_tasks.pipeline_runs.iter())
            .map(|record| record.pipeline_run_id.clone())
            .collect();
        let candidates = self.discover_candidates(&mut report, being_deleted).await;
        report.report_eviction_candidates(candidates.clone());

        let mut by_pipeline_run = Vec::new();
        let mut by_background = Vec::new();
        if !dry_run {
            info!("Starting evictions");
            let mut remaining = Capacity::new(capacity);
            for plan in plans_from_candidates(&candidates) {
                let admission = admit(
                    &plan,
                    remaining,
                    self.settings.pipeline_runs_per_task,
                    self.settings.delete_requests_per_second,
                    self.tasks.as_ref(),
                    self.index.as_ref(),
                )
                .await;
                remaining = admission.remaining;
                match plan.kind() {
                    EvictionKind::ByPipelineRun => by_pipeline_run.extend(admission.started),
                    EvictionKind::ByPipelineRunAndBackground => {
                        by_background.extend(admission.started)
                    }
                }
            }
        }
        report.report_evictions_started(EvictionKind::ByPipelineRun, by_pipeline_run);
        report.report_evictions_started(EvictionKind::ByPipelineRunAndBackground, by_background);

        report
    }

    /// `None` when the state of existing tasks could not be read.
    async fn handle_existing_tasks(
        &self,
        report: &mut CycleReport,
        dry_run: bool,
    ) -> Option<ExistingTasks> {
        let records = match self.index.list_tracked_records_with_active_deletion().await {
            Ok(records) => records,
            Err(e) => {
                report.record_store_failure("Listing pipeline runs being deleted failed", &e);
                return None;
            }
        };
        let statuses = match classify(records, self.tasks.as_ref()).await {
            Ok(statuses) => statuses,
            Err(e) => {
                report.record_store_failure("Task status lookup failed", &e);
                return None;
            }
        };
        let referenced: HashSet<TaskHandle> = statuses
            .running_tasks
            .tasks
            .iter()
            .map(|task| task.handle.clone())
            .collect();
        report.report_task_statuses(statuses.clone());

        let (cleanup, cleanup_report) = cleanup_existing_tasks(
            &statuses,
            self.tasks.as_ref(),
            self.index.as_ref(),
            dry_run,
        )
        .await;
        report.report_task_cleanup(cleanup_report);

        let untracked: Vec<RunningTask> = match self.tasks.list_running_deletion_tasks().await {
            Ok(running) => running
                .into_iter()
                .filter(|task| !referenced.contains(&task.handle))
                .collect(),
            Err(e) => {
                report.record_store_failure("Untracked task lookup failed", &e);
                return None;
            }
        };
        let untracked_task_count = untracked.len();
        report.report_untracked_tasks(untracked);

        Some(ExistingTasks {
            cleanup,
            untracked_task_count,
        })
    }

    async fn discover_candidates(
        &self,
        report: &mut CycleReport,
        being_deleted: HashSet<PipelineRunId>,
    ) -> EvictionCandidates {
        let by_pipeline = match find_orphans(
            self.index.as_ref(),
            self.canonical.as_ref(),
            &being_deleted,
        )
        .await
        {
            Ok(orphans) => orphans,
            Err(e) => {
                report.record_store_failure("Deleted pipeline run detection failed", &e);
                Vec::new()
            }
        };

        // A run slated for full deletion never also gets a background-scoped one.
        let mut exclude = being_deleted;
        exclude.extend(by_pipeline.iter().cloned());

        let by_pipeline_and_background_id =
            match find_expired_by_background(self.index.as_ref(), self.settings.ttl_days, &exclude)
                .await
            {
                Ok(grouped) => grouped,
                Err(e) => {
                    report.record_store_failure("Expired pipeline run detection failed", &e);
                    BTreeMap::new()
                }
            };

        EvictionCandidates {
            by_pipeline,
            by_pipeline_and_background_id,
        }
    }
}
