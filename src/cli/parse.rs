//! CLI parse: clap types for taxon-eviction. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Taxon eviction controller - keeps derived taxon index data in step with pipeline runs
#[derive(Parser)]
#[command(name = "taxon-eviction")]
#[command(about = "Evict derived taxon index data for deleted and expired pipeline runs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (overrides default config loading)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Disable logging entirely
    #[arg(long, default_value = "false")]
    pub quiet: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one reconciliation cycle
    Run {
        /// Classify and report only; no store is modified
        #[arg(long)]
        dry_run: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Run a cycle now and then on a fixed interval
    Schedule {
        /// Hours between cycles (default: schedule.interval_hours)
        #[arg(long)]
        interval_hours: Option<u64>,
        /// Classify and report only; no store is modified
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the effective configuration with secrets removed
    Config {
        /// Output format (toml or json)
        #[arg(long, default_value = "toml")]
        format: String,
    },
}
