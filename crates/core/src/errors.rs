use thiserror::Error;

use crate::models::{FailureReason, NodeId, TaskId, TaskStatus};

/// 调度系统统一错误类型
#[derive(Debug, Error, Clone)]
pub enum FleetError {
    #[error("数据验证失败: {0}")]
    Validation(String),

    #[error("没有满足任务 {task_id} 需求的可用节点")]
    NoSuitableNode { task_id: TaskId },

    #[error("资源不足: {0}")]
    ResourceExhausted(String),

    #[error("节点不可用: {node_id}")]
    NodeUnavailable { node_id: NodeId },

    #[error("执行后端错误: {0}")]
    BackendExecution(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("账本上报失败: {0}")]
    LedgerReporting(String),

    #[error("节点不存在: {id}")]
    NodeNotFound { id: NodeId },

    #[error("任务不存在: {id}")]
    TaskNotFound { id: TaskId },

    #[error("非法的任务状态转换: {from:?} -> {to:?}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("遥测采集错误: {0}")]
    Telemetry(String),

    #[error("网络连接失败: {0}")]
    Network(String),

    #[error("数据序列化错误: {0}")]
    Serialization(String),

    #[error("系统内部错误: {0}")]
    Internal(String),
}

pub type FleetResult<T> = Result<T, FleetError>;

impl FleetError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn resource_exhausted<S: Into<String>>(msg: S) -> Self {
        Self::ResourceExhausted(msg.into())
    }
    pub fn node_not_found(id: NodeId) -> Self {
        Self::NodeNotFound { id }
    }
    pub fn task_not_found(id: TaskId) -> Self {
        Self::TaskNotFound { id }
    }
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::BackendExecution(msg.into())
    }
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::Storage(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    /// 远端调用类错误，可由外部层重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FleetError::Network(_) | FleetError::Timeout(_) | FleetError::LedgerReporting(_)
        )
    }

    /// 与任务失败原因的对应关系，用于把执行期错误落到任务记录上
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            FleetError::NoSuitableNode { .. } => Some(FailureReason::NoSuitableNode),
            FleetError::ResourceExhausted(_) => Some(FailureReason::ResourceExhausted),
            FleetError::NodeUnavailable { .. } => Some(FailureReason::NodeUnavailable),
            FleetError::BackendExecution(_) => Some(FailureReason::BackendExecutionError),
            FleetError::Timeout(_) => Some(FailureReason::Timeout),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        FleetError::Storage(err.to_string())
    }
}

impl From<anyhow::Error> for FleetError {
    fn from(err: anyhow::Error) -> Self {
        FleetError::Internal(err.to_string())
    }
}
