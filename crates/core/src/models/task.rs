use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{FleetError, FleetResult};
use crate::models::{NodeId, ResourceVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(TaskId)
            .map_err(|_| FleetError::validation(format!("无效的任务ID: {s}")))
    }
}

/// 任务类型，决定节点侧使用哪个执行后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Training,
    Inference,
    Rendering,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [TaskKind::Training, TaskKind::Inference, TaskKind::Rendering];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Training => "training",
            TaskKind::Inference => "inference",
            TaskKind::Rendering => "rendering",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "training" => Ok(TaskKind::Training),
            "inference" => Ok(TaskKind::Inference),
            "rendering" => Ok(TaskKind::Rendering),
            _ => Err(FleetError::validation(format!("未知的任务类型: {s}"))),
        }
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 状态只能沿 pending → running → {completed | failed} 单调前进，
    /// pending 也可以直接失败（无可用节点）
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Pending, TaskStatus::Running)
                | (TaskStatus::Pending, TaskStatus::Failed)
                | (TaskStatus::Running, TaskStatus::Completed)
                | (TaskStatus::Running, TaskStatus::Failed)
        )
    }
}

/// 任务失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NoSuitableNode,
    ResourceExhausted,
    NodeUnavailable,
    BackendExecutionError,
    Timeout,
    Shutdown,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::NoSuitableNode => "no_suitable_node",
            FailureReason::ResourceExhausted => "resource_exhausted",
            FailureReason::NodeUnavailable => "node_unavailable",
            FailureReason::BackendExecutionError => "backend_execution_error",
            FailureReason::Timeout => "timeout",
            FailureReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// 任务资源需求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskRequirements {
    pub accelerator_type: String,
    pub memory_bytes: u64,
    pub compute_power_units: u64,
    pub storage_bytes: u64,
}

impl TaskRequirements {
    pub fn validate(&self) -> FleetResult<()> {
        if self.accelerator_type.trim().is_empty() {
            return Err(FleetError::validation("加速器类型不能为空"));
        }
        if self.memory_bytes == 0 {
            return Err(FleetError::validation("显存需求必须大于0"));
        }
        if self.compute_power_units == 0 {
            return Err(FleetError::validation("算力需求必须大于0"));
        }
        if self.storage_bytes == 0 {
            return Err(FleetError::validation("存储需求必须大于0"));
        }
        Ok(())
    }

    pub fn as_resources(&self) -> ResourceVector {
        ResourceVector::new(self.compute_power_units, self.memory_bytes, self.storage_bytes)
    }
}

/// 任务提交请求
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSpec {
    pub kind: TaskKind,
    pub requirements: TaskRequirements,
    pub input_ref: String,
    pub output_ref: String,
    #[serde(default)]
    pub model_ref: Option<String>,
    /// 覆盖节点默认的任务超时（秒）
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl TaskSpec {
    pub fn validate(&self) -> FleetResult<()> {
        self.requirements.validate()?;
        if self.timeout_seconds == Some(0) {
            return Err(FleetError::validation("任务超时时间必须大于0"));
        }
        Ok(())
    }
}

/// 任务记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    pub id: TaskId,
    pub kind: TaskKind,
    pub requirements: TaskRequirements,
    pub status: TaskStatus,
    pub failure_reason: Option<FailureReason>,
    pub assigned_node: Option<NodeId>,
    pub input_ref: String,
    pub output_ref: String,
    pub model_ref: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(spec: TaskSpec) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            kind: spec.kind,
            requirements: spec.requirements,
            status: TaskStatus::Pending,
            failure_reason: None,
            assigned_node: None,
            input_ref: spec.input_ref,
            output_ref: spec.output_ref,
            model_ref: spec.model_ref,
            timeout_seconds: spec.timeout_seconds,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn advance(&mut self, next: TaskStatus) -> FleetResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(FleetError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// pending → running，同时记录分配节点；一个任务只会被分配一次
    pub fn assign_to(&mut self, node_id: NodeId) -> FleetResult<()> {
        if self.assigned_node.is_some() {
            return Err(FleetError::InvalidTransition {
                from: self.status,
                to: TaskStatus::Running,
            });
        }
        self.advance(TaskStatus::Running)?;
        self.assigned_node = Some(node_id);
        Ok(())
    }

    pub fn complete(&mut self) -> FleetResult<()> {
        self.advance(TaskStatus::Completed)
    }

    pub fn fail(&mut self, reason: FailureReason) -> FleetResult<()> {
        self.advance(TaskStatus::Failed)?;
        self.failure_reason = Some(reason);
        Ok(())
    }
}
