//! Error types for the taxon eviction controller.

use crate::eviction::report::CycleReport;
use thiserror::Error;

/// Failure of a single call against the index, the task store or the relational store.
///
/// These never escape a reconciliation cycle; each call site turns them into a
/// report entry and the cycle carries on.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Request failed with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Bulk request reported item errors: {0}")]
    BulkErrors(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            StoreError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else if err.is_decode() {
            StoreError::Decode(err.to_string())
        } else if err.is_timeout() {
            StoreError::Http(format!("Request timeout: {}", err))
        } else if err.is_connect() {
            StoreError::Http(format!("Connection error: {}", err))
        } else {
            StoreError::Http(err.to_string())
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Controller-level errors.
#[derive(Debug, Error)]
pub enum EvictionError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid task handle: {0} (expected node_id:task_id)")]
    InvalidTaskHandle(String),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Output error: {0}")]
    Output(String),

    /// Raised once at the end of a cycle that recorded warnings or errors.
    #[error("TaxonIndexEvictionError: cycle finished with {warnings} warning(s) and {errors} error(s)")]
    CycleFailed {
        warnings: usize,
        errors: usize,
        report: Box<CycleReport>,
    },
}

impl From<config::ConfigError> for EvictionError {
    fn from(err: config::ConfigError) -> Self {
        EvictionError::Config(err.to_string())
    }
}
