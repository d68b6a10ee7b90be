// Config loading and validation tests

use dockwatch::config::AppConfig;
use std::time::Duration;

const VALID_CONFIG: &str = r#"
[scaling]
cpu_limit = 50.0
ram_limit = 5.0
clone_num = 2
poll_interval_secs = 1

[events]
debounce_ms = 500
settle_delay_ms = 100
restart_delay_secs = 5
max_restarts = 5
app_name_prefix = "dmm-"
created_by_label = "docker-monitor-manager"

[tasks]
workers = 16
max_pending = 128

[publishing]
broadcast_capacity = 64
"#;

#[test]
fn test_config_loads_from_str() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("load_from_str");
    assert_eq!(config.scaling.cpu_limit, 50.0);
    assert_eq!(config.scaling.ram_limit, 5.0);
    assert_eq!(config.scaling.clone_num, 2);
    assert!(config.scaling.auto_scale_enabled);
    assert_eq!(config.events.app_name_prefix, "dmm-");
    assert_eq!(config.tasks.max_pending, 128);
    assert_eq!(config.publishing.broadcast_capacity, 64);
}

#[test]
fn test_config_defaults_when_sections_omitted() {
    let minimal = r#"
[scaling]
cpu_limit = 80.0
ram_limit = 70.0
clone_num = 3
poll_interval_secs = 2
auto_scale_enabled = false
"#;
    let config = AppConfig::load_from_str(minimal).expect("valid");
    assert!(!config.scaling.auto_scale_enabled);
    assert_eq!(config.events.debounce_ms, 500);
    assert_eq!(config.events.settle_delay_ms, 100);
    assert_eq!(config.events.max_restarts, 5);
    assert_eq!(config.events.created_by_label, "docker-monitor-manager");
    assert_eq!(config.tasks.workers, 16);
    assert_eq!(config.tasks.max_pending, 128);
    assert_eq!(config.publishing.broadcast_capacity, 64);
}

#[test]
fn test_config_converts_to_runtime_settings() {
    let config = AppConfig::load_from_str(VALID_CONFIG).expect("valid");

    let limits = config.limits();
    assert_eq!(limits.clone_num, 2);
    assert_eq!(limits.poll_interval, Duration::from_secs(1));
    assert!(limits.auto_scale_enabled);

    let listener = config.listener();
    assert_eq!(listener.debounce, Duration::from_millis(500));
    assert_eq!(listener.settle_delay, Duration::from_millis(100));
    assert_eq!(listener.restart_delay, Duration::from_secs(5));
    assert_eq!(listener.created_by, "docker-monitor-manager");

    let tasks = config.task_runner();
    assert_eq!(tasks.workers, 16);
    assert_eq!(tasks.max_pending, 128);
}

#[test]
fn test_config_validation_rejects_cpu_limit_zero() {
    let bad = VALID_CONFIG.replace("cpu_limit = 50.0", "cpu_limit = 0.0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("scaling.cpu_limit"));
}

#[test]
fn test_config_validation_rejects_ram_limit_negative() {
    let bad = VALID_CONFIG.replace("ram_limit = 5.0", "ram_limit = -1.0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("scaling.ram_limit"));
}

#[test]
fn test_config_validation_rejects_clone_num_zero() {
    let bad = VALID_CONFIG.replace("clone_num = 2", "clone_num = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("clone_num"));
}

#[test]
fn test_config_validation_rejects_poll_interval_zero() {
    let bad = VALID_CONFIG.replace("poll_interval_secs = 1", "poll_interval_secs = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("poll_interval_secs"));
}

#[test]
fn test_config_validation_rejects_max_restarts_zero() {
    let bad = VALID_CONFIG.replace("max_restarts = 5", "max_restarts = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("events.max_restarts"));
}

#[test]
fn test_config_validation_rejects_empty_created_by_label() {
    let bad = VALID_CONFIG.replace(
        "created_by_label = \"docker-monitor-manager\"",
        "created_by_label = \"\"",
    );
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("created_by_label"));
}

#[test]
fn test_config_validation_rejects_workers_zero() {
    let bad = VALID_CONFIG.replace("workers = 16", "workers = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("tasks.workers"));
}

#[test]
fn test_config_validation_rejects_max_pending_zero() {
    let bad = VALID_CONFIG.replace("max_pending = 128", "max_pending = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("tasks.max_pending"));
}

#[test]
fn test_config_validation_rejects_broadcast_capacity_zero() {
    let bad = VALID_CONFIG.replace("broadcast_capacity = 64", "broadcast_capacity = 0");
    let err = AppConfig::load_from_str(&bad).unwrap_err();
    assert!(err.to_string().contains("broadcast_capacity"));
}

#[test]
fn test_config_validation_rejects_missing_scaling_section() {
    let err = AppConfig::load_from_str("[tasks]\nworkers = 4\n").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_config_validation_rejects_invalid_toml() {
    let err = AppConfig::load_from_str("not valid toml [[[").unwrap_err();
    assert!(!err.to_string().is_empty());
}

#[test]
fn test_config_load_from_file_via_env() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, VALID_CONFIG).unwrap();
    unsafe { std::env::set_var("CONFIG_FILE", path.to_str().unwrap()) };
    let result = AppConfig::load();
    unsafe { std::env::remove_var("CONFIG_FILE") };
    let config = result.expect("load from CONFIG_FILE");
    assert_eq!(config.scaling.clone_num, 2);
    assert_eq!(config.tasks.workers, 16);
}
