//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::cli::presentation::format_cycle_report_text;
use crate::error::EvictionError;
use serde_json::json;

/// Map domain errors to a string for CLI output, in the command's output format.
/// A failed cycle carries its whole report so the operator sees what went wrong.
pub fn map_error(e: &EvictionError, format: &str) -> String {
    match (e, format) {
        (EvictionError::CycleFailed { report, .. }, "json") => {
            serde_json::to_value(report.as_ref())
                .and_then(|report| {
                    serde_json::to_string_pretty(&json!({ "error": e.to_string(), "report": report }))
                })
                .unwrap_or_else(|_| e.to_string())
        }
        (EvictionError::CycleFailed { report, .. }, _) => {
            format!("{}\n\n{}", e, format_cycle_report_text(report))
        }
        (_, "json") => json!({ "error": e.to_string() }).to_string(),
        _ => e.to_string(),
    }
}
