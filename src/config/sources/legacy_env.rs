//! Flat deployment variables (`ES_HOST`, `EVICTION_TASK_CONCURRENCY`, ...).
//!
//! These win over every other source so an existing deployment keeps its
//! behavior. `DEPLOYMENT_ENVIRONMENT` only supplies the database name default.

use config::builder::DefaultState;
use config::ConfigBuilder;
use config::ConfigError;

#[derive(Debug, Clone, Copy)]
enum Kind {
    Str,
    Int,
    Bool,
}

const LEGACY_VARIABLES: &[(&str, &str, Kind)] = &[
    ("ES_HOST", "search.host", Kind::Str),
    ("MYSQL_HOST", "database.host", Kind::Str),
    ("MYSQL_PORT", "database.port", Kind::Int),
    ("MYSQL_DB", "database.name", Kind::Str),
    ("MYSQL_USERNAME", "database.username", Kind::Str),
    ("MYSQL_PASSWORD", "database.password", Kind::Str),
    ("DELETE_REQUESTS_PER_SECOND", "eviction.delete_requests_per_second", Kind::Int),
    ("EVICTION_TASK_CONCURRENCY", "eviction.max_concurrent_deletion_tasks", Kind::Int),
    ("PIPELINE_RUNS_PER_TASK", "eviction.pipeline_runs_per_task", Kind::Int),
    ("PIPELINE_RUN_TTL_IN_DAYS", "eviction.ttl_days", Kind::Int),
    ("DRY_RUN", "eviction.dry_run", Kind::Bool),
];

/// Add the process environment's flat variables as overrides.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    apply(builder, |name| std::env::var(name).ok())
}

/// Apply flat variables resolved through `lookup`.
pub fn apply<F>(
    mut builder: ConfigBuilder<DefaultState>,
    lookup: F,
) -> Result<ConfigBuilder<DefaultState>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(environment) = lookup("DEPLOYMENT_ENVIRONMENT") {
        builder = builder.set_default("database.name", format!("idseq_{}", environment))?;
    }

    for (name, key, kind) in LEGACY_VARIABLES {
        let Some(raw) = lookup(name) else {
            continue;
        };
        builder = match kind {
            Kind::Str => builder.set_override(*key, raw)?,
            Kind::Int => {
                let value: i64 = raw.trim().parse().map_err(|_| {
                    ConfigError::Message(format!("{} must be an integer, got '{}'", name, raw))
                })?;
                builder.set_override(*key, value)?
            }
            // Anything other than a case-insensitive "true" is false.
            Kind::Bool => builder.set_override(*key, raw.trim().eq_ignore_ascii_case("true"))?,
        };
    }
    Ok(builder)
}
