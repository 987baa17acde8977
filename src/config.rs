//! Configuration System
//!
//! Layered configuration for the eviction controller: built-in defaults, a
//! TOML file, prefixed environment variables and the flat variable names the
//! scheduled job has always been deployed with. Validation collects every
//! problem instead of stopping at the first.

use crate::error::EvictionError;
use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvictionConfig {
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub eviction: EvictionSettings,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Search index connection and index names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_tracking_index")]
    pub tracking_index: String,
    #[serde(default = "default_derived_index")]
    pub derived_index: String,
    /// Hits per search page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_tracking_index() -> String {
    "pipeline_runs".to_string()
}

fn default_derived_index() -> String {
    "scored_taxon_counts".to_string()
}

fn default_page_size() -> usize {
    10_000
}

fn default_search_timeout_secs() -> u64 {
    300
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: None,
            password: None,
            tracking_index: default_tracking_index(),
            derived_index: default_derived_index(),
            page_size: default_page_size(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

/// Relational store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub require_tls: bool,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_db_port() -> u16 {
    3306
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_db_port(),
            name: String::new(),
            username: String::new(),
            password: None,
            require_tls: default_true(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Values consumed by the reconciliation core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvictionSettings {
    #[serde(default = "default_max_concurrent_deletion_tasks")]
    pub max_concurrent_deletion_tasks: usize,
    /// Pipeline run ids per submitted delete.
    #[serde(default = "default_pipeline_runs_per_task")]
    pub pipeline_runs_per_task: usize,
    #[serde(default = "default_ttl_days")]
    pub ttl_days: u32,
    #[serde(default = "default_delete_requests_per_second")]
    pub delete_requests_per_second: u32,
    #[serde(default)]
    pub dry_run: bool,
}

fn default_max_concurrent_deletion_tasks() -> usize {
    6
}

fn default_pipeline_runs_per_task() -> usize {
    500
}

fn default_ttl_days() -> u32 {
    30
}

fn default_delete_requests_per_second() -> u32 {
    1000
}

impl Default for EvictionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_deletion_tasks: default_max_concurrent_deletion_tasks(),
            pipeline_runs_per_task: default_pipeline_runs_per_task(),
            ttl_days: default_ttl_days(),
            delete_requests_per_second: default_delete_requests_per_second(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
}

fn default_interval_hours() -> u64 {
    6
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_hours: default_interval_hours(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Search(String),
    Database(String),
    Eviction(String),
    Schedule(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Search(msg) => write!(f, "Search: {}", msg),
            ValidationError::Database(msg) => write!(f, "Database: {}", msg),
            ValidationError::Eviction(msg) => write!(f, "Eviction: {}", msg),
            ValidationError::Schedule(msg) => write!(f, "Schedule: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Keys removed from the reportable view.
const SECRET_KEYS: &[(&str, &str)] = &[
    ("search", "password"),
    ("database", "username"),
    ("database", "password"),
];

impl EvictionSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.pipeline_runs_per_task == 0 {
            return Err("pipeline_runs_per_task must be at least 1".to_string());
        }
        if self.ttl_days == 0 {
            return Err("ttl_days must be at least 1".to_string());
        }
        if self.delete_requests_per_second == 0 {
            return Err("delete_requests_per_second must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl EvictionConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if self.search.host.trim().is_empty() {
            errors.push(ValidationError::Search("host cannot be empty".to_string()));
        } else if !self.search.host.starts_with("http://")
            && !self.search.host.starts_with("https://")
        {
            errors.push(ValidationError::Search(format!(
                "host must be an http(s) URL, got '{}'",
                self.search.host
            )));
        }
        if self.search.page_size == 0 {
            errors.push(ValidationError::Search(
                "page_size must be at least 1".to_string(),
            ));
        }

        for (field, value) in [
            ("host", &self.database.host),
            ("name", &self.database.name),
            ("username", &self.database.username),
        ] {
            if value.trim().is_empty() {
                errors.push(ValidationError::Database(format!("{} cannot be empty", field)));
            }
        }

        if let Err(e) = self.eviction.validate() {
            errors.push(ValidationError::Eviction(e));
        }

        if self.schedule.interval_hours == 0 {
            errors.push(ValidationError::Schedule(
                "interval_hours must be at least 1".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// [`validate`](Self::validate) folded into a single error.
    pub fn ensure_valid(&self) -> Result<(), EvictionError> {
        self.validate().map_err(|errors| {
            let error_msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            EvictionError::Config(format!(
                "Configuration validation failed:\n{}",
                error_msgs.join("\n")
            ))
        })
    }

    /// Parameters safe to put in logs and reports.
    pub fn reportable(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        for (section, key) in SECRET_KEYS {
            if let Some(section) = value.get_mut(*section).and_then(Value::as_object_mut) {
                section.remove(*key);
            }
        }
        value
    }
}
