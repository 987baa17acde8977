//! CLI presentation: text and json formatters for cycle reports and configuration.

use crate::error::EvictionError;
use crate::eviction::report::{
    CleanupStep, CycleReport, EvictionStarted, Issue, StepOutcome, SubmitOutcome,
};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde_json::Value;

fn section_title(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn step_text(step: &Option<CleanupStep>) -> String {
    match step.as_ref().map(|step| &step.response) {
        None => "-".to_string(),
        Some(StepOutcome::Ok(summary)) => format!("{} removed", summary.affected),
        Some(StepOutcome::Skipped) => "skipped (dry run)".to_string(),
        Some(StepOutcome::Error(e)) => format!("{}", format!("error: {}", e).red()),
    }
}

fn eviction_row(kind: &str, started: &EvictionStarted) -> Vec<String> {
    let task = match &started.start_eviction_response {
        SubmitOutcome::Task(handle) => handle.to_string(),
        SubmitOutcome::Error(e) => format!("{}", format!("error: {}", e).red()),
    };
    let tagged = match &started.set_task_id_response {
        None => "-".to_string(),
        Some(StepOutcome::Ok(summary)) => format!("{} tagged", summary.affected),
        Some(StepOutcome::Skipped) => "skipped".to_string(),
        Some(StepOutcome::Error(e)) => format!("{}", format!("error: {}", e).red()),
    };
    vec![
        kind.to_string(),
        started
            .background_id
            .as_ref()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string()),
        started.pipeline_run_ids.len().to_string(),
        task,
        tagged,
    ]
}

fn issues_table(label: String, issues: &[Issue]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Level", "Message"]);
    for issue in issues {
        table.add_row(vec![label.clone(), issue.message.clone()]);
    }
    table
}

/// Human-readable cycle report.
pub fn format_cycle_report_text(report: &CycleReport) -> String {
    let mut out = Vec::new();

    let title = if report.dry_run {
        "Eviction cycle (dry run)"
    } else {
        "Eviction cycle"
    };
    out.push(section_title(title));

    let statuses = &report.task_statuses;
    let mut summary = Table::new();
    summary.load_preset(UTF8_BORDERS_ONLY);
    summary.set_header(vec!["", "Tasks", "Pipeline runs"]);
    for (label, tasks, records) in [
        (
            "Running",
            statuses.running_tasks.tasks.len(),
            statuses.running_tasks.pipeline_runs.len(),
        ),
        (
            "Succeeded",
            statuses.succeeded_tasks.tasks.len(),
            statuses.succeeded_tasks.pipeline_runs.len(),
        ),
        (
            "Failed",
            statuses.failed_tasks.tasks.len(),
            statuses.failed_tasks.pipeline_runs.len(),
        ),
        (
            "Missing",
            statuses.missing_tasks.tasks.len(),
            statuses.missing_tasks.pipeline_runs.len(),
        ),
    ] {
        summary.add_row(vec![label.to_string(), tasks.to_string(), records.to_string()]);
    }
    if !report.untracked_tasks.is_empty() {
        summary.add_row(vec![
            "Untracked".to_string(),
            report.untracked_tasks.len().to_string(),
            "-".to_string(),
        ]);
    }
    out.push(summary.to_string());

    let mut cleanup = Table::new();
    cleanup.load_preset(UTF8_BORDERS_ONLY);
    cleanup.set_header(vec!["Cleanup", "Result"]);
    cleanup.add_row(vec!["Succeeded tasks".to_string(), step_text(&report.task_cleanup.succeeded)]);
    cleanup.add_row(vec!["Failed tasks".to_string(), step_text(&report.task_cleanup.failed)]);
    cleanup.add_row(vec![
        "Pipeline runs".to_string(),
        step_text(&report.task_cleanup.pipeline_runs_deleted),
    ]);
    out.push(cleanup.to_string());

    let candidates = &report.eviction_candidates;
    let expired: usize = candidates
        .by_pipeline_and_background_id
        .values()
        .map(Vec::len)
        .sum();
    out.push(format!(
        "Capacity: {}   Candidates: {} deleted, {} expired across {} background(s)",
        report.capacity,
        candidates.by_pipeline.len(),
        expired,
        candidates.by_pipeline_and_background_id.len()
    ));

    let started = &report.evictions_started;
    if started.by_pipeline_run_id.is_empty() && started.by_pipeline_run_id_and_background_id.is_empty()
    {
        out.push("No evictions started.".dimmed().to_string());
    } else {
        let mut table = Table::new();
        table.load_preset(UTF8_BORDERS_ONLY);
        table.set_header(vec!["Scope", "Background", "Pipeline runs", "Task", "Records"]);
        for eviction in &started.by_pipeline_run_id {
            table.add_row(eviction_row("pipeline", eviction));
        }
        for eviction in &started.by_pipeline_run_id_and_background_id {
            table.add_row(eviction_row("background", eviction));
        }
        out.push(section_title("Evictions started"));
        out.push(table.to_string());
    }

    if report.warnings.is_empty() && report.errors.is_empty() {
        out.push(format!("{}", "No warnings or errors.".green()));
    } else {
        out.push(section_title("Issues"));
        if !report.errors.is_empty() {
            out.push(issues_table(format!("{}", "error".red()), &report.errors).to_string());
        }
        if !report.warnings.is_empty() {
            out.push(issues_table(format!("{}", "warning".yellow()), &report.warnings).to_string());
        }
    }

    out.join("\n")
}

pub fn format_cycle_report_json(report: &CycleReport) -> Result<String, EvictionError> {
    serde_json::to_string_pretty(report).map_err(|e| EvictionError::Output(e.to_string()))
}

/// Render reportable configuration as toml or json.
pub fn format_config(params: &Value, format: &str) -> Result<String, EvictionError> {
    match format {
        "json" => {
            serde_json::to_string_pretty(params).map_err(|e| EvictionError::Output(e.to_string()))
        }
        "toml" => toml::to_string_pretty(&without_nulls(params.clone()))
            .map_err(|e| EvictionError::Output(e.to_string())),
        other => Err(EvictionError::Output(format!(
            "Unknown format '{}' (expected toml or json)",
            other
        ))),
    }
}

/// toml has no null; unset options are left out.
fn without_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, without_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(without_nulls).collect()),
        other => other,
    }
}
