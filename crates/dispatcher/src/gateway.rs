use std::sync::Arc;

use async_trait::async_trait;

use fleet_core::{
    FailureReason, FleetResult, LedgerGateway, NodeId, NodeRegistration, TaskId, TaskRecord,
};

use crate::service::DispatcherService;

/// 进程内账本网关，节点与调度器同进程运行时直接调用调度器服务
pub struct LocalLedgerGateway {
    service: Arc<DispatcherService>,
}

impl LocalLedgerGateway {
    pub fn new(service: Arc<DispatcherService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl LedgerGateway for LocalLedgerGateway {
    async fn register_node(&self, registration: NodeRegistration) -> FleetResult<NodeId> {
        self.service.register_node(registration).await
    }

    async fn submit_heartbeat(&self, node_id: NodeId) -> FleetResult<()> {
        self.service.heartbeat(node_id).await.map(|_| ())
    }

    async fn report_completion(&self, task_id: TaskId) -> FleetResult<()> {
        self.service.complete_task(task_id).await.map(|_| ())
    }

    async fn report_failure(&self, task_id: TaskId, reason: FailureReason) -> FleetResult<()> {
        self.service.fail_task(task_id, reason).await.map(|_| ())
    }

    async fn task_info(&self, task_id: TaskId) -> FleetResult<TaskRecord> {
        self.service.task(task_id).await
    }
}
