use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::info;

use fleet_core::{
    config::DispatcherConfig, EventSink, FailureReason, FleetResult, NodeId, NodeRecord,
    NodeRegistration, TaskId, TaskRecord, TaskSpec,
};

use crate::heartbeat_monitor::{HeartbeatMonitor, HeartbeatMonitorConfig, SweepReport};
use crate::notifier::{AssignmentNotifier, AssignmentRelay};
use crate::registry::{NodeRegistry, NodeSnapshot};
use crate::scheduler::{SchedulerStats, TaskScheduler};
use crate::strategies::{BestFitStrategy, NodeSelectionStrategy};
use crate::task_store::TaskStore;

/// 调度器服务
///
/// 组装注册表、任务存储、调度器、心跳监控与分配通知转发，
/// 并向 HTTP 层和进程内账本网关提供统一入口。
pub struct DispatcherService {
    registry: Arc<NodeRegistry>,
    scheduler: Arc<TaskScheduler>,
    monitor: Arc<HeartbeatMonitor>,
    relay: Arc<AssignmentRelay>,
    tasks: Arc<TaskStore>,
}

impl DispatcherService {
    pub fn new(config: &DispatcherConfig, notifier: Arc<dyn AssignmentNotifier>) -> Self {
        Self::with_strategy(config, notifier, Arc::new(BestFitStrategy::new()))
    }

    pub fn with_strategy(
        config: &DispatcherConfig,
        notifier: Arc<dyn AssignmentNotifier>,
        strategy: Arc<dyn NodeSelectionStrategy>,
    ) -> Self {
        let (events, receiver) = EventSink::channel();
        let registry = Arc::new(NodeRegistry::new(events.clone()));
        let tasks = Arc::new(TaskStore::new());
        let scheduler = Arc::new(TaskScheduler::new(
            Arc::clone(&registry),
            Arc::clone(&tasks),
            strategy,
            events.clone(),
        ));
        let monitor = Arc::new(HeartbeatMonitor::new(
            Arc::clone(&registry),
            Arc::clone(&tasks),
            events,
            Some(HeartbeatMonitorConfig {
                heartbeat_interval_seconds: config.heartbeat_interval_seconds,
                ..Default::default()
            }),
        ));
        let relay = Arc::new(AssignmentRelay::new(
            Arc::clone(&scheduler),
            notifier,
            receiver,
        ));

        Self {
            registry,
            scheduler,
            monitor,
            relay,
            tasks,
        }
    }

    pub async fn start(&self, shutdown: &broadcast::Sender<()>) -> FleetResult<()> {
        info!(strategy = self.scheduler.strategy_name(), "启动调度器服务");
        self.relay.start(shutdown.subscribe()).await?;
        self.monitor.start(shutdown.subscribe()).await;
        Ok(())
    }

    pub async fn stop(&self) {
        self.monitor.stop().await;
        self.relay.stop().await;
        info!("调度器服务已停止");
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<HeartbeatMonitor> {
        &self.monitor
    }

    pub async fn register_node(&self, registration: NodeRegistration) -> FleetResult<NodeId> {
        self.registry.register(registration).await
    }

    pub async fn deregister_node(&self, node_id: NodeId) -> FleetResult<()> {
        self.registry.deregister(node_id).await
    }

    pub async fn heartbeat(&self, node_id: NodeId) -> FleetResult<NodeRecord> {
        self.registry.record_heartbeat(node_id, Utc::now()).await
    }

    pub async fn set_maintenance(&self, node_id: NodeId, enabled: bool) -> FleetResult<NodeRecord> {
        self.registry
            .set_maintenance(node_id, enabled, Utc::now())
            .await
    }

    pub async fn node(&self, node_id: NodeId) -> FleetResult<NodeSnapshot> {
        self.scheduler.node_info(node_id).await
    }

    pub async fn nodes(&self) -> Vec<NodeSnapshot> {
        self.registry.snapshot().await
    }

    pub async fn submit_task(&self, spec: TaskSpec) -> FleetResult<TaskRecord> {
        let task_id = self.scheduler.submit(spec).await?;
        self.scheduler.status(task_id).await
    }

    pub async fn task(&self, task_id: TaskId) -> FleetResult<TaskRecord> {
        self.scheduler.status(task_id).await
    }

    pub async fn tasks(&self) -> Vec<TaskRecord> {
        let mut tasks = self.tasks.list().await;
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    pub async fn complete_task(&self, task_id: TaskId) -> FleetResult<TaskRecord> {
        self.scheduler.complete(task_id).await?;
        self.scheduler.status(task_id).await
    }

    pub async fn fail_task(&self, task_id: TaskId, reason: FailureReason) -> FleetResult<TaskRecord> {
        self.scheduler.fail(task_id, reason).await?;
        self.scheduler.status(task_id).await
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.scheduler.stats().await
    }

    /// 立即执行一次心跳巡检
    pub async fn sweep_now(&self) -> SweepReport {
        self.monitor.sweep(Utc::now()).await
    }
}
