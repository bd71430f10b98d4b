use serde::{Deserialize, Serialize};

use crate::models::TaskKind;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub bind_address: String,
    /// 心跳周期；超过两倍周期未收到心跳的节点被判定为失联
    pub heartbeat_interval_seconds: u64,
    /// 向节点推送分配通知的超时
    pub notify_timeout_seconds: u64,
    pub cors_enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:8080".to_string(),
            heartbeat_interval_seconds: 30,
            notify_timeout_seconds: 10,
            cors_enabled: true,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("调度器监听地址不能为空"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.notify_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("分配通知超时时间必须大于0"));
        }

        Ok(())
    }
}

/// 一种任务类型对应的执行命令
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub kind: TaskKind,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NodeConfig {
    pub enabled: bool,
    pub name: String,
    /// 调度器推送任务分配时使用的地址
    pub advertise_address: String,
    pub bind_address: String,
    pub dispatcher_url: String,
    pub accelerator_type: String,
    pub compute_power_units: u64,
    pub memory_bytes: u64,
    pub supported_frameworks: Vec<String>,
    pub max_concurrent_tasks: usize,
    pub task_timeout_seconds: u64,
    pub heartbeat_interval_seconds: u64,
    pub drain_deadline_seconds: u64,
    pub report_timeout_seconds: u64,
    /// 未配置的任务类型使用空操作后端
    pub backends: Vec<BackendConfig>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "fleet-node".to_string());

        Self {
            enabled: false,
            name,
            advertise_address: "http://127.0.0.1:9090".to_string(),
            bind_address: "0.0.0.0:9090".to_string(),
            dispatcher_url: "http://127.0.0.1:8080".to_string(),
            accelerator_type: "NVIDIA".to_string(),
            compute_power_units: 100,
            memory_bytes: 16 * 1024 * 1024 * 1024,
            supported_frameworks: vec!["pytorch".to_string(), "tensorflow".to_string()],
            max_concurrent_tasks: 4,
            task_timeout_seconds: 3600,
            heartbeat_interval_seconds: 30,
            drain_deadline_seconds: 30,
            report_timeout_seconds: 10,
            backends: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            return Err(anyhow::anyhow!("节点名称不能为空"));
        }

        if !self.advertise_address.starts_with("http://")
            && !self.advertise_address.starts_with("https://")
        {
            return Err(anyhow::anyhow!(
                "节点通告地址必须是 http(s) URL: {}",
                self.advertise_address
            ));
        }

        if self.dispatcher_url.is_empty() {
            return Err(anyhow::anyhow!("调度器地址不能为空"));
        }

        if self.accelerator_type.trim().is_empty() {
            return Err(anyhow::anyhow!("加速器类型不能为空"));
        }

        if self.compute_power_units == 0 {
            return Err(anyhow::anyhow!("算力必须大于0"));
        }

        if self.memory_bytes == 0 {
            return Err(anyhow::anyhow!("显存容量必须大于0"));
        }

        if self.max_concurrent_tasks == 0 {
            return Err(anyhow::anyhow!("最大并发任务数必须大于0"));
        }

        if self.task_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("任务超时时间必须大于0"));
        }

        if self.heartbeat_interval_seconds == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.report_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("上报超时时间必须大于0"));
        }

        for backend in &self.backends {
            if backend.command.trim().is_empty() {
                return Err(anyhow::anyhow!("{} 后端的命令不能为空", backend.kind));
            }
        }

        Ok(())
    }
}
