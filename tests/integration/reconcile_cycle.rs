//! End-to-end reconciliation cycles against in-memory stores.

use super::test_utils::{ids, reconciler, submitted};
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use taxon_eviction::error::EvictionError;
use taxon_eviction::eviction::report::{StepOutcome, SubmitOutcome};
use taxon_eviction::store::memory::{completed_task, MutationCall, Operation};
use taxon_eviction::store::{EvictionFilter, InMemoryStores};
use taxon_eviction::tracking::TrackedRecord;
use taxon_eviction::types::{BackgroundId, PipelineRunId, TaskHandle};

fn expired(pipeline_run_id: &str, background_id: &str) -> TrackedRecord {
    let mut record = TrackedRecord::new(pipeline_run_id, background_id);
    record.created_at = Some(Utc::now() - Duration::days(120));
    record
}

fn filter(ids: &[&str]) -> EvictionFilter {
    EvictionFilter {
        pipeline_run_ids: ids.iter().map(|id| PipelineRunId::from(*id)).collect(),
        background_id: None,
    }
}

#[tokio::test]
async fn running_and_succeeded_tasks_leave_one_batch_of_capacity() {
    let stores = Arc::new(InMemoryStores::new());
    let running = TaskHandle::new("aaaa-1111", 1111);
    let succeeded = TaskHandle::new("bbbb-2222", 2222);
    stores.add_running_task(running.clone(), filter(&["10"]));
    stores.add_completed_task(completed_task(&succeeded, vec![]));
    stores.add_record(TrackedRecord::new("10", "1").with_deletion_task(running));
    stores.add_record(TrackedRecord::new("20", "1").with_deletion_task(succeeded.clone()));
    for id in ["30", "31", "32"] {
        stores.add_record(TrackedRecord::new(id, "1"));
    }

    let report = reconciler(&stores, 2, 2).run(false).await.unwrap();

    assert_eq!(report.capacity, 1);
    let batches = submitted(&stores);
    assert_eq!(batches.len(), 1);
    assert_eq!(ids(&batches[0]), vec!["30", "31"]);
    assert_eq!(
        report.eviction_candidates.by_pipeline,
        vec![
            PipelineRunId::from("30"),
            PipelineRunId::from("31"),
            PipelineRunId::from("32")
        ]
    );
    // The succeeded task and its record are gone.
    assert!(!stores.completed_handles().contains(&succeeded));
    assert!(stores
        .records()
        .iter()
        .all(|record| record.pipeline_run_id.as_str() != "20"));
}

#[tokio::test]
async fn capacity_one_submits_only_the_first_batch() {
    let stores = Arc::new(InMemoryStores::new());
    for id in ["pr_1", "pr_2", "pr_3"] {
        stores.add_record(TrackedRecord::new(id, "bg"));
    }

    let report = reconciler(&stores, 1, 2).run(false).await.unwrap();

    let batches = submitted(&stores);
    assert_eq!(batches.len(), 1);
    assert_eq!(ids(&batches[0]), vec!["pr_1", "pr_2"]);
    let pr_3 = stores
        .records()
        .into_iter()
        .find(|record| record.pipeline_run_id.as_str() == "pr_3")
        .unwrap();
    assert!(pr_3.deletion_task.is_none(), "pr_3 stays a candidate");
    assert_eq!(report.evictions_started.by_pipeline_run_id.len(), 1);
}

#[tokio::test]
async fn deleted_pipeline_runs_are_not_also_evicted_by_background() {
    let stores = Arc::new(InMemoryStores::new());
    stores.add_canonical(["2".into()]);
    stores.add_record(expired("1", "100"));
    stores.add_record(expired("2", "100"));

    let report = reconciler(&stores, 6, 500).run(false).await.unwrap();

    let candidates = &report.eviction_candidates;
    assert_eq!(candidates.by_pipeline, vec![PipelineRunId::from("1")]);
    assert_eq!(
        candidates.by_pipeline_and_background_id[&BackgroundId::from("100")],
        vec![PipelineRunId::from("2")]
    );
    let by_pipeline: HashSet<_> = candidates.by_pipeline.iter().collect();
    for runs in candidates.by_pipeline_and_background_id.values() {
        assert!(runs.iter().all(|run| !by_pipeline.contains(run)));
    }
}

#[tokio::test]
async fn pipeline_batches_are_admitted_before_background_batches() {
    let stores = Arc::new(InMemoryStores::new());
    stores.add_canonical(["5".into(), "6".into()]);
    stores.add_record(TrackedRecord::new("1", "100"));
    stores.add_record(TrackedRecord::new("2", "100"));
    stores.add_record(expired("5", "200"));
    stores.add_record(expired("6", "300"));

    let report = reconciler(&stores, 2, 1).run(false).await.unwrap();

    let batches = submitted(&stores);
    assert_eq!(batches.len(), 2);
    assert!(batches.iter().all(|batch| batch.background_id.is_none()));
    assert!(report
        .evictions_started
        .by_pipeline_run_id_and_background_id
        .is_empty());
}

#[tokio::test]
async fn background_batches_share_what_is_left() {
    let stores = Arc::new(InMemoryStores::new());
    stores.add_canonical(["5".into(), "6".into(), "7".into()]);
    stores.add_record(TrackedRecord::new("1", "100"));
    stores.add_record(expired("5", "200"));
    stores.add_record(expired("6", "300"));
    stores.add_record(expired("7", "400"));

    reconciler(&stores, 3, 500).run(false).await.unwrap();

    let scopes: Vec<Option<String>> = submitted(&stores)
        .iter()
        .map(|batch| batch.background_id.as_ref().map(|id| id.to_string()))
        .collect();
    assert_eq!(
        scopes,
        vec![None, Some("200".to_string()), Some("300".to_string())]
    );
    let untouched = stores
        .records()
        .into_iter()
        .find(|record| record.background_id.as_str() == "400")
        .unwrap();
    assert!(untouched.deletion_task.is_none());
}

#[tokio::test]
async fn dry_run_mutates_nothing_and_keeps_report_shape() {
    let seed = |stores: &InMemoryStores| {
        let succeeded = TaskHandle::new("bbbb", 2);
        let failed = TaskHandle::new("cccc", 3);
        stores.add_completed_task(completed_task(&succeeded, vec![]));
        stores.add_completed_task(completed_task(&failed, vec![json!({"status": 500})]));
        stores.add_record(TrackedRecord::new("1", "10").with_deletion_task(succeeded));
        stores.add_record(TrackedRecord::new("2", "10").with_deletion_task(failed));
        stores.add_record(TrackedRecord::new("3", "10"));
        stores.add_record(expired("4", "20"));
        stores.add_canonical(["4".into()]);
    };

    let dry = Arc::new(InMemoryStores::new());
    seed(&*dry);
    let dry_report = reconciler(&dry, 4, 500).run_cycle(true).await;

    let live = Arc::new(InMemoryStores::new());
    seed(&*live);
    let live_report = reconciler(&live, 4, 500).run_cycle(false).await;

    assert!(dry.calls().is_empty(), "dry run issued {:?}", dry.calls());
    assert!(!live.calls().is_empty());
    assert_eq!(dry.records().len(), 4);

    let keys = |value: serde_json::Value| -> Vec<String> {
        value.as_object().unwrap().keys().cloned().collect()
    };
    let dry_value = serde_json::to_value(&dry_report).unwrap();
    let live_value = serde_json::to_value(&live_report).unwrap();
    assert_eq!(keys(dry_value.clone()), keys(live_value.clone()));
    assert_eq!(
        keys(dry_value["task_cleanup"].clone()),
        keys(live_value["task_cleanup"].clone())
    );
    assert_eq!(
        dry_report.task_cleanup.succeeded.unwrap().response,
        StepOutcome::Skipped
    );
    assert_eq!(dry_report.eviction_candidates, live_report.eviction_candidates);
    // The failed task is an error in both modes.
    assert_eq!(dry_report.errors[0].message, "Failed tasks found");
}

#[tokio::test]
async fn second_run_without_changes_starts_nothing_new() {
    let stores = Arc::new(InMemoryStores::new());
    stores.add_record(TrackedRecord::new("1", "10"));
    stores.add_record(TrackedRecord::new("1", "20"));
    stores.add_record(expired("2", "10"));
    stores.add_canonical(["2".into()]);
    let reconciler = reconciler(&stores, 6, 500);

    let first = reconciler.run(false).await.unwrap();
    assert_eq!(submitted(&stores).len(), 2);
    assert_eq!(first.capacity, 6);

    stores.clear_calls();
    let second = reconciler.run(false).await.unwrap();

    assert!(submitted(&stores).is_empty());
    assert_eq!(second.capacity, 4);
    assert!(second.eviction_candidates.is_empty());
    assert_eq!(second.task_statuses.running_tasks.tasks.len(), 2);
}

#[tokio::test]
async fn finished_tasks_are_cleaned_up_on_the_next_cycle() {
    let stores = Arc::new(InMemoryStores::new());
    stores.add_record(TrackedRecord::new("1", "10"));
    stores.add_record(TrackedRecord::new("1", "20"));
    let reconciler = reconciler(&stores, 6, 500);

    reconciler.run(false).await.unwrap();
    let handle = stores.running_handles()[0].clone();
    assert!(stores.finish_task(&handle, vec![]));

    let report = reconciler.run(false).await.unwrap();

    assert_eq!(report.task_statuses.succeeded_tasks.pipeline_runs.len(), 2);
    assert!(stores.records().is_empty());
    assert!(stores.completed_handles().is_empty());
    assert_eq!(report.capacity, 6);
    assert!(report.eviction_candidates.is_empty());
}

#[tokio::test]
async fn failed_task_is_reported_and_retried() {
    let stores = Arc::new(InMemoryStores::new());
    stores.add_record(TrackedRecord::new("1", "10"));
    let reconciler = reconciler(&stores, 6, 500);

    reconciler.run(false).await.unwrap();
    let first_handle = stores.running_handles()[0].clone();
    stores.finish_task(&first_handle, vec![json!({"cause": "version_conflict"})]);

    let err = reconciler.run(false).await.unwrap_err();
    let EvictionError::CycleFailed { report, .. } = err else {
        panic!("expected a failed cycle");
    };
    assert_eq!(report.errors[0].message, "Failed tasks found");
    assert!(!stores.completed_handles().contains(&first_handle));

    // Resubmitted within the same cycle and tagged with the new handle.
    let retried = &report.evictions_started.by_pipeline_run_id[0];
    let SubmitOutcome::Task(second_handle) = &retried.start_eviction_response else {
        panic!("resubmission failed");
    };
    assert_ne!(second_handle, &first_handle);
    assert_eq!(stores.records()[0].deletion_task.as_ref(), Some(second_handle));
}

#[tokio::test]
async fn missing_task_is_reported_but_never_resubmitted() {
    let stores = Arc::new(InMemoryStores::new());
    stores.add_canonical(["1".into()]);
    stores.add_record(TrackedRecord::new("1", "10").with_deletion_task(TaskHandle::new("gone", 9)));

    let err = reconciler(&stores, 6, 500).run(false).await.unwrap_err();

    let EvictionError::CycleFailed { report, errors, .. } = err else {
        panic!("expected a failed cycle");
    };
    assert_eq!(errors, 1);
    assert_eq!(report.errors[0].message, "Missing tasks found");
    assert_eq!(report.task_statuses.missing_tasks.pipeline_runs.len(), 1);
    assert!(stores.calls().is_empty());
}

#[tokio::test]
async fn orphaned_run_with_missing_task_is_not_resubmitted() {
    let stores = Arc::new(InMemoryStores::new());
    stores.add_record(expired("1", "10"));
    let reconciler = reconciler(&stores, 6, 500);

    reconciler.run(false).await.unwrap();
    let lost = stores.running_handles()[0].clone();
    stores.forget_task(&lost);
    stores.clear_calls();

    let err = reconciler.run(false).await.unwrap_err();
    let EvictionError::CycleFailed { report, errors, .. } = err else {
        panic!("expected a failed cycle");
    };
    assert_eq!(errors, 1);
    assert_eq!(report.errors[0].message, "Missing tasks found");
    assert_eq!(report.task_statuses.missing_tasks.tasks, vec![lost.clone()]);
    assert!(report.eviction_candidates.is_empty());
    assert!(submitted(&stores).is_empty());
    assert_eq!(stores.records()[0].deletion_task.as_ref(), Some(&lost));
}

#[tokio::test]
async fn tag_failure_leaves_a_blind_task_that_holds_capacity() {
    let stores = Arc::new(InMemoryStores::new());
    stores.add_record(TrackedRecord::new("1", "10"));
    stores.fail(Operation::TagRecords);
    let reconciler = reconciler(&stores, 6, 500);

    let err = reconciler.run(false).await.unwrap_err();
    let EvictionError::CycleFailed { report, .. } = err else {
        panic!("expected a failed cycle");
    };
    assert_eq!(
        report.errors[0].message,
        "Task ID set failed after eviction started"
    );
    let blind = stores.running_handles()[0].clone();
    assert!(stores.records()[0].deletion_task.is_none());

    stores.recover(Operation::TagRecords);
    stores.clear_calls();
    let err = reconciler.run(false).await.unwrap_err();
    let EvictionError::CycleFailed {
        report,
        warnings,
        errors,
    } = err
    else {
        panic!("expected a failed cycle");
    };

    // No record references the blind task, so it is untracked rather than missing.
    assert_eq!((warnings, errors), (1, 0));
    assert_eq!(report.warnings[0].message, "Untracked running tasks found");
    assert_eq!(report.untracked_tasks[0].handle, blind);
    assert!(report.task_statuses.missing_tasks.tasks.is_empty());
    assert_eq!(report.capacity, 5);

    // The run is still untagged, so it is submitted again next to the blind task.
    assert_eq!(submitted(&stores).len(), 1);
    assert_eq!(stores.running_handles().len(), 2);
    let retagged = stores.records()[0].deletion_task.clone().unwrap();
    assert_ne!(retagged, blind);
}

#[tokio::test]
async fn store_failures_are_isolated_per_step() {
    let stores = Arc::new(InMemoryStores::new());
    let succeeded = TaskHandle::new("bbbb", 2);
    stores.add_completed_task(completed_task(&succeeded, vec![]));
    stores.add_record(TrackedRecord::new("1", "10").with_deletion_task(succeeded));
    stores.add_record(TrackedRecord::new("2", "10"));
    stores.fail(Operation::DeleteTrackedRecords);

    let err = reconciler(&stores, 6, 500).run(false).await.unwrap_err();
    let EvictionError::CycleFailed {
        report,
        warnings,
        errors,
    } = err
    else {
        panic!("expected a failed cycle");
    };

    assert_eq!((warnings, errors), (1, 0));
    assert_eq!(report.warnings[0].message, "Pipeline_run cleanup failed");
    // Admission still went ahead for the unrelated candidate.
    assert_eq!(ids(&submitted(&stores)[0]), vec!["2"]);
    assert!(stores
        .calls()
        .iter()
        .any(|call| matches!(call, MutationCall::TagRecords { .. })));
}
