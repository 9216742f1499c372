//! Loading configuration files and environment overrides.

use birch::config::BirchConfig;
use birch_queue::ExecutionMode;
use serial_test::serial;
use std::fs;
use tempfile::tempdir;

const CONFIG: &str = r#"
[application]
name = "bench"
log_level = "debug"
log_format = "json"

[queue]
id = "bench_queue"
max_parallel_scans = 3

[[instruments]]
id = "stage"
type = "mock_stage"

[[instruments]]
id = "dmm"
type = "mock_meter"

[[scans]]
project = "p"
name = "line"

[[scans.movements]]
instrument = "stage"
positions = [1.0, 2.0]

[[scans.measurements]]
instrument = "dmm"
"#;

#[test]
#[serial]
fn shipped_config_is_valid() {
    let config = BirchConfig::load_from(concat!(env!("CARGO_MANIFEST_DIR"), "/config/birch.toml"))
        .unwrap();
    config.validate().unwrap();
    assert_eq!(config.queue.id, "lab_queue");
    assert_eq!(config.scans.len(), 2);
    assert_eq!(config.enabled_instruments().len(), 4);
}

#[test]
#[serial]
fn file_values_are_loaded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("birch.toml");
    fs::write(&path, CONFIG).unwrap();

    let config = BirchConfig::load_from(&path).unwrap();
    assert_eq!(config.application.name, "bench");
    assert_eq!(config.queue.max_parallel_scans, 3);
    assert_eq!(config.queue.execution_mode, ExecutionMode::Serial);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn environment_overrides_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("birch.toml");
    fs::write(&path, CONFIG).unwrap();

    std::env::set_var("BIRCH_QUEUE__MAX_PARALLEL_SCANS", "5");
    std::env::set_var("BIRCH_QUEUE__EXECUTION_MODE", "PARALLEL");
    let config = BirchConfig::load_from(&path);
    std::env::remove_var("BIRCH_QUEUE__MAX_PARALLEL_SCANS");
    std::env::remove_var("BIRCH_QUEUE__EXECUTION_MODE");

    let config = config.unwrap();
    assert_eq!(config.queue.max_parallel_scans, 5);
    assert_eq!(config.queue.execution_mode, ExecutionMode::Parallel);
    assert_eq!(config.queue.id, "bench_queue");
}

#[test]
#[serial]
fn missing_file_falls_back_to_defaults() {
    let dir = tempdir().unwrap();
    let config = BirchConfig::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config.application.log_level, "info");
    assert!(config.scans.is_empty());
}

#[test]
#[serial]
fn malformed_section_is_a_load_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("birch.toml");
    fs::write(&path, "[queue]\nmax_parallel_scans = \"many\"\n").unwrap();

    assert!(BirchConfig::load_from(&path).is_err());
}
