use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{FleetError, FleetResult};
use crate::models::{ResourceVector, TaskRequirements};

/// 节点标识，由注册表顺序分配；数值大小即调度时的平局裁决顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("node-").unwrap_or(s);
        raw.parse::<u64>()
            .map(NodeId)
            .map_err(|_| FleetError::validation(format!("无效的节点ID: {s}")))
    }
}

/// 节点状态
///
/// Active ↔ Inactive 由心跳自动切换；Maintenance 只能由运维操作进入和退出。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Inactive,
    Maintenance,
}

/// 节点声明的算力能力
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeCapability {
    pub accelerator_type: String,
    pub compute_power_units: u64,
    pub memory_bytes: u64,
    pub storage_bytes: u64,
    #[serde(default)]
    pub supported_frameworks: BTreeSet<String>,
}

impl NodeCapability {
    pub fn validate(&self) -> FleetResult<()> {
        if self.accelerator_type.trim().is_empty() {
            return Err(FleetError::validation("加速器类型不能为空"));
        }
        if self.compute_power_units == 0 {
            return Err(FleetError::validation("算力必须大于0"));
        }
        if self.memory_bytes == 0 {
            return Err(FleetError::validation("显存容量必须大于0"));
        }
        Ok(())
    }

    /// 静态能力是否满足任务需求（不考虑当前余量）
    pub fn satisfies(&self, requirements: &TaskRequirements) -> bool {
        self.accelerator_type == requirements.accelerator_type
            && self.compute_power_units >= requirements.compute_power_units
            && self.memory_bytes >= requirements.memory_bytes
    }

    pub fn capacity(&self) -> ResourceVector {
        ResourceVector::new(
            self.compute_power_units,
            self.memory_bytes,
            self.storage_bytes,
        )
    }
}

/// 节点注册请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRegistration {
    /// 节点接收任务推送的基础地址
    pub address: String,
    pub capability: NodeCapability,
}

/// 节点记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub address: String,
    pub capability: NodeCapability,
    pub status: NodeStatus,
    pub last_heartbeat_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

impl NodeRecord {
    pub fn new(id: NodeId, registration: NodeRegistration, now: DateTime<Utc>) -> Self {
        Self {
            id,
            address: registration.address,
            capability: registration.capability,
            status: NodeStatus::Active,
            last_heartbeat_at: now,
            registered_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == NodeStatus::Active
    }

    /// 心跳是否已超过给定阈值
    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now - self.last_heartbeat_at > threshold
    }
}
