//! Merge rules: defaults, override order, conflict handling.
//!
//! Order (lowest to highest): defaults, config file, `TAXON_EVICTION__*`
//! variables, flat deployment variables.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("search.tracking_index", "pipeline_runs")?
        .set_default("search.derived_index", "scored_taxon_counts")?
        .set_default("search.page_size", 10_000)?
        .set_default("search.timeout_secs", 300)?
        .set_default("database.port", 3306)?
        .set_default("database.require_tls", true)?
        .set_default("database.connect_timeout_secs", 10)?
        .set_default("eviction.max_concurrent_deletion_tasks", 6)?
        .set_default("eviction.pipeline_runs_per_task", 500)?
        .set_default("eviction.ttl_days", 30)?
        .set_default("eviction.delete_requests_per_second", 1000)?
        .set_default("eviction.dry_run", false)?
        .set_default("schedule.interval_hours", 6)
}
