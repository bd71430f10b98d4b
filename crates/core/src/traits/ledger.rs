use async_trait::async_trait;

use crate::errors::FleetResult;
use crate::models::{FailureReason, NodeId, NodeRegistration, TaskId, TaskRecord};

/// 账本网关
///
/// 节点侧通过它完成注册、心跳和任务结果上报；调度器进程内使用
/// 直连实现，独立部署的节点使用 HTTP 实现。
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn register_node(&self, registration: NodeRegistration) -> FleetResult<NodeId>;

    async fn submit_heartbeat(&self, node_id: NodeId) -> FleetResult<()>;

    async fn report_completion(&self, task_id: TaskId) -> FleetResult<()>;

    async fn report_failure(&self, task_id: TaskId, reason: FailureReason) -> FleetResult<()>;

    /// 拉取任务详情，节点收到分配通知后调用
    async fn task_info(&self, task_id: TaskId) -> FleetResult<TaskRecord>;
}
