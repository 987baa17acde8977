//! Shared test utilities for integration tests
//!
//! Environment isolation for config loading and a small builder for
//! reconcilers wired to in-memory stores.

use std::sync::{Arc, Mutex};
use taxon_eviction::config::EvictionSettings;
use taxon_eviction::eviction::Reconciler;
use taxon_eviction::store::memory::MutationCall;
use taxon_eviction::store::{EvictionFilter, InMemoryStores};
use tempfile::TempDir;

/// Global mutex to serialize environment variable access across all tests
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Variables that config loading reads; cleared for every isolated test.
const CONFIG_VARIABLES: &[&str] = &[
    "ES_HOST",
    "MYSQL_HOST",
    "MYSQL_PORT",
    "MYSQL_DB",
    "MYSQL_USERNAME",
    "MYSQL_PASSWORD",
    "DELETE_REQUESTS_PER_SECOND",
    "EVICTION_TASK_CONCURRENCY",
    "PIPELINE_RUNS_PER_TASK",
    "PIPELINE_RUN_TTL_IN_DAYS",
    "DRY_RUN",
    "DEPLOYMENT_ENVIRONMENT",
    "TAXON_EVICTION__EVICTION__TTL_DAYS",
    "TAXON_EVICTION__SEARCH__HOST",
    "XDG_CONFIG_HOME",
    "HOME",
];

/// Run `f` with XDG_CONFIG_HOME pointed at `test_dir`, the given variables
/// set, and every other config variable cleared. The environment is restored
/// afterwards.
pub fn with_env<F, R>(test_dir: &TempDir, vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let saved: Vec<(&str, Option<String>)> = CONFIG_VARIABLES
        .iter()
        .map(|name| (*name, std::env::var(name).ok()))
        .collect();

    for name in CONFIG_VARIABLES {
        std::env::remove_var(name);
    }
    std::env::set_var("HOME", test_dir.path().join("home"));
    std::env::set_var("XDG_CONFIG_HOME", test_dir.path());
    for (name, value) in vars {
        std::env::set_var(name, value);
    }

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));

    for (name, value) in saved {
        match value {
            Some(value) => std::env::set_var(name, value),
            None => std::env::remove_var(name),
        }
    }

    match result {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

pub fn reconciler(stores: &Arc<InMemoryStores>, max_concurrent: usize, batch: usize) -> Reconciler {
    let settings = EvictionSettings {
        max_concurrent_deletion_tasks: max_concurrent,
        pipeline_runs_per_task: batch,
        ..EvictionSettings::default()
    };
    Reconciler::new(stores.clone(), stores.clone(), stores.clone(), settings)
}

/// Filters of every submitted bulk delete, in order.
pub fn submitted(stores: &InMemoryStores) -> Vec<EvictionFilter> {
    stores
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            MutationCall::SubmitBulkDelete { filter, .. } => Some(filter),
            _ => None,
        })
        .collect()
}

pub fn ids(filter: &EvictionFilter) -> Vec<String> {
    filter
        .pipeline_run_ids
        .iter()
        .map(|id| id.to_string())
        .collect()
}
