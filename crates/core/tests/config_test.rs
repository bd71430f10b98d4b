use std::io::Write;

use fleet_core::config::{FleetConfig, TelemetrySourceKind};
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
[dispatcher]
bind_address = "127.0.0.1:18080"
heartbeat_interval_seconds = 10

[node]
enabled = true
name = "render-07"
advertise_address = "http://10.0.0.7:9090"
compute_power_units = 320
max_concurrent_tasks = 8

[storage]
max_storage_bytes = 5000000000

[telemetry]
source = "nvidia_smi"
poll_interval_seconds = 2
"#,
    );

    let config = FleetConfig::load(file.path().to_str()).unwrap();

    assert_eq!(config.dispatcher.bind_address, "127.0.0.1:18080");
    assert_eq!(config.dispatcher.heartbeat_interval_seconds, 10);
    assert!(config.node.enabled);
    assert_eq!(config.node.name, "render-07");
    assert_eq!(config.node.compute_power_units, 320);
    assert_eq!(config.node.max_concurrent_tasks, 8);
    assert_eq!(config.storage.max_storage_bytes, 5_000_000_000);
    assert_eq!(config.telemetry.source, TelemetrySourceKind::NvidiaSmi);
    assert_eq!(config.telemetry.poll_interval_seconds, 2);

    // 未出现的配置段保持默认值
    assert_eq!(config.node.task_timeout_seconds, 3600);
    assert_eq!(config.observability.log_format, "pretty");
}

#[test]
fn test_missing_file_is_an_error() {
    let result = FleetConfig::load(Some("/nonexistent/fleet.toml"));
    assert!(result.is_err());
}

#[test]
fn test_invalid_values_fail_validation() {
    let file = write_config(
        r#"
[node]
max_concurrent_tasks = 0
"#,
    );

    assert!(FleetConfig::load(file.path().to_str()).is_err());
}
