use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    dispatcher_node::{DispatcherConfig, NodeConfig},
    observability::ObservabilityConfig,
    storage_telemetry::{StorageConfig, TelemetryConfig},
};

const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/fleet.toml",
    "fleet.toml",
    "/etc/fleet/config.toml",
];

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    pub dispatcher: DispatcherConfig,
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
    pub observability: ObservabilityConfig,
}

impl FleetConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: FLEET_, nesting: __)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_with_env(config_path, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix("FLEET")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_env(config_path: Option<&str>, env: Environment) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if !Path::new(path).exists() {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(env);

        let config: FleetConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: FleetConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.dispatcher.validate().context("调度器配置验证失败")?;
        self.node.validate().context("节点配置验证失败")?;
        self.storage.validate().context("存储配置验证失败")?;
        self.telemetry.validate().context("遥测配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;

        if self.node.enabled && !self.dispatcher.enabled && self.node.dispatcher_url.is_empty() {
            return Err(anyhow::anyhow!("独立节点必须配置调度器地址"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetrySourceKind;
    use crate::models::TaskKind;
    use std::io::Write;

    fn no_env() -> Environment {
        Environment::with_prefix("FLEET")
            .prefix_separator("_")
            .separator("__")
            .source(Some(config::Map::new()))
    }

    #[test]
    fn test_defaults_follow_node_conventions() {
        let config = FleetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.node.heartbeat_interval_seconds, 30);
        assert_eq!(config.node.max_concurrent_tasks, 4);
        assert_eq!(config.node.task_timeout_seconds, 3600);
        assert_eq!(config.storage.max_storage_bytes, 1_000_000_000);
        assert_eq!(config.telemetry.poll_interval_seconds, 5);
        assert_eq!(config.telemetry.thresholds.temperature_c, 85.0);
        assert_eq!(config.telemetry.thresholds.utilization_percent, 95.0);
        assert_eq!(config.telemetry.thresholds.memory_ratio, 0.9);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = FleetConfig::from_toml(
            r#"
            [node]
            enabled = true
            name = "gpu-01"
            max_concurrent_tasks = 2

            [[node.backends]]
            kind = "training"
            command = "/usr/local/bin/train"
            args = ["--fast"]

            [telemetry]
            source = "nvidia_smi"
            "#,
        )
        .unwrap();

        assert_eq!(config.node.name, "gpu-01");
        assert_eq!(config.node.max_concurrent_tasks, 2);
        assert_eq!(config.node.task_timeout_seconds, 3600);
        assert_eq!(config.node.backends[0].kind, TaskKind::Training);
        assert_eq!(config.telemetry.source, TelemetrySourceKind::NvidiaSmi);
        assert_eq!(config.dispatcher.bind_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = FleetConfig::default();
        config.node.max_concurrent_tasks = 0;
        assert!(config.validate().is_err());

        let mut config = FleetConfig::default();
        config.dispatcher.heartbeat_interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = FleetConfig::default();
        config.observability.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[dispatcher]\nheartbeat_interval_seconds = 15\n\n[storage]\ndata_dir = \"/var/lib/fleet\""
        )
        .unwrap();

        let mut vars = config::Map::new();
        vars.insert(
            "FLEET_NODE__MAX_CONCURRENT_TASKS".to_string(),
            "8".to_string(),
        );
        let env = Environment::with_prefix("FLEET")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(Some(vars));

        let path = file.path().to_str().unwrap();
        let config = FleetConfig::load_with_env(Some(path), env).unwrap();
        assert_eq!(config.dispatcher.heartbeat_interval_seconds, 15);
        assert_eq!(config.storage.data_dir, "/var/lib/fleet");
        assert_eq!(config.node.max_concurrent_tasks, 8);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = FleetConfig::load_with_env(Some("/nonexistent/fleet.toml"), no_env());
        assert!(result.is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = FleetConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(FleetConfig::from_toml(&text).unwrap(), config);
    }
}
