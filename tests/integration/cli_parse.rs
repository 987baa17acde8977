//! Integration tests for command-line parsing and routing

use clap::Parser;
use taxon_eviction::cli::{command_name, Cli, Commands, RunContext};
use taxon_eviction::config::EvictionConfig;

#[test]
fn test_run_defaults() {
    let cli = Cli::try_parse_from(["taxon-eviction", "run"]).unwrap();
    match cli.command {
        Commands::Run { dry_run, format } => {
            assert!(!dry_run);
            assert_eq!(format, "text");
        }
        _ => panic!("expected run"),
    }
    assert!(cli.config.is_none());
    assert!(!cli.verbose);
}

#[test]
fn test_schedule_flags() {
    let cli = Cli::try_parse_from([
        "taxon-eviction",
        "--config",
        "/etc/taxon-eviction.toml",
        "schedule",
        "--interval-hours",
        "12",
        "--dry-run",
    ])
    .unwrap();
    assert_eq!(command_name(&cli.command), "schedule");
    match cli.command {
        Commands::Schedule {
            interval_hours,
            dry_run,
        } => {
            assert_eq!(interval_hours, Some(12));
            assert!(dry_run);
        }
        _ => panic!("expected schedule"),
    }
}

#[test]
fn test_unknown_subcommand_is_rejected() {
    assert!(Cli::try_parse_from(["taxon-eviction", "evict-everything"]).is_err());
}

#[test]
fn test_config_command_prints_toml_without_secrets() {
    let mut config = EvictionConfig::default();
    config.search.host = "https://search.internal".to_string();
    config.database.username = "evictor".to_string();
    config.database.password = Some("hunter2".to_string());
    let context = RunContext::from_config(config);

    let cli = Cli::try_parse_from(["taxon-eviction", "config"]).unwrap();
    let output = context.execute(&cli.command).unwrap();

    assert!(output.contains("https://search.internal"));
    assert!(!output.contains("hunter2"));
    assert!(!output.contains("evictor"));
}

#[test]
fn test_run_with_unknown_format_fails_fast() {
    let context = RunContext::from_config(EvictionConfig::default());
    let cli = Cli::try_parse_from(["taxon-eviction", "run", "--format", "yaml"]).unwrap();
    assert!(context.execute(&cli.command).is_err());
}
