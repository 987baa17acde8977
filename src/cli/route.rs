//! CLI route: single route table and run context. Dispatches to the reconciler and presentation.

use crate::cli::parse::Commands;
use crate::cli::presentation::{format_config, format_cycle_report_json, format_cycle_report_text};
use crate::config::{ConfigLoader, EvictionConfig};
use crate::error::EvictionError;
use crate::eviction::{CycleReport, Reconciler};
use crate::store::{MySqlCanonicalStore, OpenSearchClient};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

const SECONDS_PER_HOUR: u64 = 3600;

fn schedule_period(hours: u64) -> Result<Duration, EvictionError> {
    if hours == 0 {
        return Err(EvictionError::Config(
            "interval_hours must be at least 1".to_string(),
        ));
    }
    hours
        .checked_mul(SECONDS_PER_HOUR)
        .map(Duration::from_secs)
        .ok_or_else(|| {
            EvictionError::Config(format!("interval_hours is too large: {}", hours))
        })
}

/// Runtime context for CLI execution: the loaded configuration.
/// Built from an optional config path using ConfigLoader only.
pub struct RunContext {
    config: EvictionConfig,
}

impl RunContext {
    /// Load configuration. Validation happens per command, so `config` can
    /// still show an incomplete setup.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, EvictionError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        Ok(Self { config })
    }

    pub fn from_config(config: EvictionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvictionConfig {
        &self.config
    }

    /// Execute a command and return its printable output.
    pub fn execute(&self, command: &Commands) -> Result<String, EvictionError> {
        match command {
            Commands::Run { dry_run, format } => self.handle_run(*dry_run, format),
            Commands::Schedule {
                interval_hours,
                dry_run,
            } => self.handle_schedule(*interval_hours, *dry_run),
            Commands::Config { format } => format_config(&self.config.reportable(), format),
        }
    }

    fn runtime() -> Result<tokio::runtime::Runtime, EvictionError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| EvictionError::Runtime(format!("Failed to create async runtime: {}", e)))
    }

    /// `--dry-run` can only turn dry run on, never off.
    fn effective_dry_run(&self, flag: bool) -> bool {
        flag || self.config.eviction.dry_run
    }

    fn handle_run(&self, dry_run: bool, format: &str) -> Result<String, EvictionError> {
        if format != "text" && format != "json" {
            return Err(EvictionError::Output(format!(
                "Unknown format '{}' (expected text or json)",
                format
            )));
        }
        self.config.ensure_valid()?;
        let dry_run = self.effective_dry_run(dry_run);

        let report = Self::runtime()?.block_on(self.run_once(dry_run))?;
        match format {
            "json" => format_cycle_report_json(&report),
            _ => Ok(format_cycle_report_text(&report)),
        }
    }

    fn handle_schedule(
        &self,
        interval_hours: Option<u64>,
        dry_run: bool,
    ) -> Result<String, EvictionError> {
        let period = schedule_period(interval_hours.unwrap_or(self.config.schedule.interval_hours))?;
        self.config.ensure_valid()?;
        let dry_run = self.effective_dry_run(dry_run);

        Self::runtime()?.block_on(self.schedule_loop(period, dry_run))?;
        Ok(String::new())
    }

    async fn build_reconciler(&self) -> Result<Reconciler, EvictionError> {
        let search = Arc::new(OpenSearchClient::new(&self.config.search)?);
        let canonical = Arc::new(MySqlCanonicalStore::connect(&self.config.database).await?);
        Ok(Reconciler::new(
            canonical,
            search.clone(),
            search,
            self.config.eviction.clone(),
        )
        .with_params(self.config.reportable()))
    }

    async fn run_once(&self, dry_run: bool) -> Result<CycleReport, EvictionError> {
        info!(dry_run, "Job parameters: {}", self.config.reportable());
        self.build_reconciler().await?.run(dry_run).await
    }

    /// First cycle runs immediately. A failed cycle is logged and the loop goes on.
    async fn schedule_loop(&self, period: Duration, dry_run: bool) -> Result<(), EvictionError> {
        let reconciler = self.build_reconciler().await?;
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match reconciler.run(dry_run).await {
                Ok(report) => info!(
                    capacity = report.capacity,
                    started = report.evictions_started.by_pipeline_run_id.len()
                        + report.evictions_started.by_pipeline_run_id_and_background_id.len(),
                    "Scheduled eviction cycle succeeded"
                ),
                Err(EvictionError::CycleFailed {
                    warnings, errors, ..
                }) => error!(warnings, errors, "Scheduled eviction cycle failed"),
                Err(e) => error!(error = %e, "Scheduled eviction cycle failed"),
            }
        }
    }
}
