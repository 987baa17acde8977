//! Integration tests for layered configuration loading

use super::test_utils::with_env;
use taxon_eviction::config::ConfigLoader;
use tempfile::TempDir;

const COMPLETE_CONFIG: &str = r#"
[search]
host = "https://search.internal:443"
page_size = 2000

[database]
host = "db.internal"
name = "idseq_staging"
username = "evictor"
password = "from-file"

[eviction]
max_concurrent_deletion_tasks = 3
ttl_days = 45
"#;

#[test]
fn test_explicit_file_overrides_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("eviction.toml");
    std::fs::write(&config_file, COMPLETE_CONFIG).unwrap();

    let config = with_env(&temp_dir, &[], || ConfigLoader::load_from_file(&config_file)).unwrap();

    assert_eq!(config.search.host, "https://search.internal:443");
    assert_eq!(config.search.page_size, 2000);
    assert_eq!(config.search.tracking_index, "pipeline_runs");
    assert_eq!(config.eviction.max_concurrent_deletion_tasks, 3);
    assert_eq!(config.eviction.ttl_days, 45);
    assert_eq!(config.eviction.pipeline_runs_per_task, 500);
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.toml");
    let result = with_env(&temp_dir, &[], || ConfigLoader::load_from_file(&missing));
    assert!(result.is_err());
}

#[test]
fn test_global_file_is_picked_up_from_xdg_config_home() {
    let temp_dir = TempDir::new().unwrap();
    let global_dir = temp_dir.path().join("taxon-eviction");
    std::fs::create_dir_all(&global_dir).unwrap();
    std::fs::write(global_dir.join("config.toml"), COMPLETE_CONFIG).unwrap();

    let config = with_env(&temp_dir, &[], ConfigLoader::load).unwrap();

    assert_eq!(config.database.name, "idseq_staging");
    assert_eq!(config.eviction.ttl_days, 45);
}

#[test]
fn test_environment_layers_override_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("eviction.toml");
    std::fs::write(&config_file, COMPLETE_CONFIG).unwrap();

    let config = with_env(
        &temp_dir,
        &[
            ("TAXON_EVICTION__EVICTION__TTL_DAYS", "60"),
            ("EVICTION_TASK_CONCURRENCY", "9"),
            ("MYSQL_PASSWORD", "from-env"),
            ("DRY_RUN", "TRUE"),
        ],
        || ConfigLoader::load_from_file(&config_file),
    )
    .unwrap();

    assert_eq!(config.eviction.ttl_days, 60);
    assert_eq!(config.eviction.max_concurrent_deletion_tasks, 9);
    assert_eq!(config.database.password.as_deref(), Some("from-env"));
    assert!(config.eviction.dry_run);
}

#[test]
fn test_flat_variables_alone_make_a_valid_config() {
    let temp_dir = TempDir::new().unwrap();

    let config = with_env(
        &temp_dir,
        &[
            ("ES_HOST", "http://localhost:9200"),
            ("MYSQL_HOST", "localhost"),
            ("MYSQL_USERNAME", "root"),
            ("DEPLOYMENT_ENVIRONMENT", "dev"),
        ],
        ConfigLoader::load,
    )
    .unwrap();
    config.ensure_valid().unwrap();

    assert_eq!(config.database.name, "idseq_dev");
    assert_eq!(config.eviction.max_concurrent_deletion_tasks, 6);
}

#[test]
fn test_validation_reports_every_problem() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("bad.toml");
    std::fs::write(
        &config_file,
        r#"
[search]
host = "search.internal"

[eviction]
pipeline_runs_per_task = 0
"#,
    )
    .unwrap();

    let config = with_env(&temp_dir, &[], || ConfigLoader::load_from_file(&config_file)).unwrap();
    let err = config.ensure_valid().unwrap_err().to_string();

    assert!(err.contains("http(s) URL"));
    assert!(err.contains("pipeline_runs_per_task"));
    assert!(err.contains("Database: host cannot be empty"));
}

#[test]
fn test_reportable_parameters_hide_credentials() {
    let temp_dir = TempDir::new().unwrap();
    let config_file = temp_dir.path().join("eviction.toml");
    std::fs::write(&config_file, COMPLETE_CONFIG).unwrap();

    let config = with_env(&temp_dir, &[], || ConfigLoader::load_from_file(&config_file)).unwrap();
    let params = config.reportable().to_string();

    assert!(!params.contains("from-file"));
    assert!(!params.contains("evictor"));
    assert!(params.contains("idseq_staging"));
}
