use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 一次加速器遥测读数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuTelemetry {
    pub memory_used: u64,
    pub memory_total: u64,
    pub temperature_c: f64,
    pub utilization_percent: f64,
    pub sampled_at: DateTime<Utc>,
}

impl GpuTelemetry {
    /// 空闲读数，用于节点刚启动、尚无采样时
    pub fn idle(memory_total: u64) -> Self {
        Self {
            memory_used: 0,
            memory_total,
            temperature_c: 0.0,
            utilization_percent: 0.0,
            sampled_at: Utc::now(),
        }
    }

    pub fn memory_ratio(&self) -> f64 {
        if self.memory_total == 0 {
            return 0.0;
        }
        self.memory_used as f64 / self.memory_total as f64
    }
}

/// 健康阈值，任一读数达到阈值即视为不可用
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub temperature_c: f64,
    pub utilization_percent: f64,
    pub memory_ratio: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            temperature_c: 85.0,
            utilization_percent: 95.0,
            memory_ratio: 0.9,
        }
    }
}

impl HealthThresholds {
    pub fn is_healthy(&self, sample: &GpuTelemetry) -> bool {
        sample.temperature_c < self.temperature_c
            && sample.utilization_percent < self.utilization_percent
            && sample.memory_ratio() < self.memory_ratio
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.temperature_c <= 0.0 {
            return Err("温度阈值必须大于0".to_string());
        }
        if !(0.0..=100.0).contains(&self.utilization_percent) || self.utilization_percent == 0.0 {
            return Err("利用率阈值必须在 (0, 100] 范围内".to_string());
        }
        if !(0.0..=1.0).contains(&self.memory_ratio) || self.memory_ratio == 0.0 {
            return Err("显存占用比例阈值必须在 (0, 1] 范围内".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(temp: f64, util: f64, used: u64) -> GpuTelemetry {
        GpuTelemetry {
            memory_used: used,
            memory_total: 100,
            temperature_c: temp,
            utilization_percent: util,
            sampled_at: Utc::now(),
        }
    }

    #[test]
    fn test_thresholds_are_inclusive() {
        let thresholds = HealthThresholds::default();
        assert!(thresholds.is_healthy(&sample(84.9, 94.0, 89)));
        assert!(!thresholds.is_healthy(&sample(85.0, 10.0, 10)));
        assert!(!thresholds.is_healthy(&sample(40.0, 95.0, 10)));
        assert!(!thresholds.is_healthy(&sample(40.0, 10.0, 90)));
    }

    #[test]
    fn test_idle_sample_is_healthy() {
        assert!(HealthThresholds::default().is_healthy(&GpuTelemetry::idle(1024)));
        assert_eq!(GpuTelemetry::idle(0).memory_ratio(), 0.0);
    }

    #[test]
    fn test_threshold_validation() {
        assert!(HealthThresholds::default().validate().is_ok());
        let bad = HealthThresholds {
            memory_ratio: 1.5,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
