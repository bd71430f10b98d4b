use serde::{Deserialize, Serialize};

use crate::models::HealthThresholds;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: String,
    pub temp_dir: String,
    pub max_storage_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            temp_dir: "./temp".to_string(),
            max_storage_bytes: 1_000_000_000,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.data_dir.is_empty() {
            return Err(anyhow::anyhow!("数据目录不能为空"));
        }

        if self.temp_dir.is_empty() {
            return Err(anyhow::anyhow!("临时目录不能为空"));
        }

        if self.max_storage_bytes == 0 {
            return Err(anyhow::anyhow!("最大存储容量必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TelemetrySourceKind {
    /// 固定读数，非 NVIDIA 加速器或测试环境使用
    Static,
    NvidiaSmi,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetryConfig {
    pub source: TelemetrySourceKind,
    pub poll_interval_seconds: u64,
    pub thresholds: HealthThresholds,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            source: TelemetrySourceKind::Static,
            poll_interval_seconds: 5,
            thresholds: HealthThresholds::default(),
        }
    }
}

impl TelemetryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.poll_interval_seconds == 0 {
            return Err(anyhow::anyhow!("遥测轮询间隔必须大于0"));
        }

        self.thresholds
            .validate()
            .map_err(|e| anyhow::anyhow!("健康阈值配置无效: {}", e))
    }
}
