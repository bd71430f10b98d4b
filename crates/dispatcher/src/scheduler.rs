use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use fleet_core::{
    EventSink, FailureReason, FleetError, FleetResult, NodeId, NodeStatus, SchedulerEvent,
    TaskId, TaskRecord, TaskSpec, TaskStatus,
};

use crate::registry::{NodeRegistry, NodeSnapshot};
use crate::strategies::NodeSelectionStrategy;
use crate::task_store::{TaskCounts, TaskStore};

/// 调度统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub nodes_active: usize,
    pub nodes_inactive: usize,
    pub nodes_maintenance: usize,
    pub tasks: TaskCounts,
}

/// 任务调度器
///
/// 负责接收任务、按策略挑选节点并在节点锁内完成资源预留。
/// 调度失败的任务直接标记为失败，不做自动重试。
pub struct TaskScheduler {
    registry: Arc<NodeRegistry>,
    tasks: Arc<TaskStore>,
    strategy: Arc<dyn NodeSelectionStrategy>,
    events: EventSink,
}

impl TaskScheduler {
    pub fn new(
        registry: Arc<NodeRegistry>,
        tasks: Arc<TaskStore>,
        strategy: Arc<dyn NodeSelectionStrategy>,
        events: EventSink,
    ) -> Self {
        Self {
            registry,
            tasks,
            strategy,
            events,
        }
    }

    /// 提交任务
    ///
    /// 需求不合法时直接拒绝，不产生任何记录。合法任务会立即尝试调度；
    /// 没有合适节点时任务被标记失败，但仍返回任务ID。
    pub async fn submit(&self, spec: TaskSpec) -> FleetResult<TaskId> {
        spec.validate()?;

        let record = TaskRecord::new(spec);
        let task_id = record.id;
        self.tasks.insert(record).await?;
        metrics::counter!("fleet_tasks_submitted_total").increment(1);
        debug!(task_id = %task_id, "任务已提交");

        match self.schedule(task_id).await {
            Ok(_) | Err(FleetError::NoSuitableNode { .. }) => Ok(task_id),
            Err(e) => Err(e),
        }
    }

    /// 为待调度任务选择节点并完成分配
    pub async fn schedule(&self, task_id: TaskId) -> FleetResult<NodeId> {
        let task = self.tasks.get(task_id).await?;
        if task.status != TaskStatus::Pending {
            return Err(FleetError::InvalidTransition {
                from: task.status,
                to: TaskStatus::Running,
            });
        }

        let nodes = self.registry.snapshot().await;
        let ranked = self.strategy.rank_candidates(&task.requirements, &nodes);

        for node_id in ranked {
            match self.assign(task_id, node_id).await {
                Ok(()) => return Ok(node_id),
                Err(
                    e @ (FleetError::NodeUnavailable { .. }
                    | FleetError::ResourceExhausted(_)
                    | FleetError::NodeNotFound { .. }),
                ) => {
                    debug!(
                        task_id = %task_id,
                        node_id = %node_id,
                        strategy = self.strategy.name(),
                        "候选节点重新校验失败，尝试下一个: {}",
                        e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        self.tasks
            .update(task_id, |record| record.fail(FailureReason::NoSuitableNode))
            .await?;
        warn!(
            task_id = %task_id,
            accelerator = %task.requirements.accelerator_type,
            compute = task.requirements.compute_power_units,
            memory = task.requirements.memory_bytes,
            "没有可用节点，任务调度失败"
        );
        metrics::counter!("fleet_tasks_failed_total", "reason" => FailureReason::NoSuitableNode.to_string())
            .increment(1);
        self.events.emit(SchedulerEvent::TaskFailed {
            task_id,
            reason: FailureReason::NoSuitableNode,
            at: Utc::now(),
        });
        Err(FleetError::NoSuitableNode { task_id })
    }

    /// 在节点锁内重新校验状态与余量，预留资源并把任务置为运行中
    pub async fn assign(&self, task_id: TaskId, node_id: NodeId) -> FleetResult<()> {
        let handle = self.registry.handle(node_id).await?;
        let mut entry = handle.lock().await;

        if entry.record.status != NodeStatus::Active {
            return Err(FleetError::NodeUnavailable { node_id });
        }

        let task = self.tasks.get(task_id).await?;
        if task.status != TaskStatus::Pending {
            return Err(FleetError::InvalidTransition {
                from: task.status,
                to: TaskStatus::Running,
            });
        }

        if !entry.record.capability.satisfies(&task.requirements) {
            return Err(FleetError::resource_exhausted(format!(
                "节点 {} 的能力不满足任务 {} 的需求",
                node_id, task_id
            )));
        }

        let request = task.requirements.as_resources();
        if !entry.ledger.try_reserve(&request) {
            return Err(FleetError::resource_exhausted(format!(
                "节点 {} 余量不足: 需要 {:?}, 剩余 {:?}",
                node_id,
                request,
                entry.ledger.headroom()
            )));
        }

        if let Err(e) = self
            .tasks
            .update(task_id, |record| record.assign_to(node_id))
            .await
        {
            entry.ledger.release(&request);
            return Err(e);
        }
        entry.running.insert(task_id, request);
        let node_address = entry.record.address.clone();
        drop(entry);

        info!(
            task_id = %task_id,
            node_id = %node_id,
            strategy = self.strategy.name(),
            "任务已分配到节点"
        );
        metrics::counter!("fleet_tasks_assigned_total").increment(1);
        self.events.emit(SchedulerEvent::TaskAssigned {
            task_id,
            node_id,
            node_address,
            at: Utc::now(),
        });
        Ok(())
    }

    /// 节点上报任务完成
    pub async fn complete(&self, task_id: TaskId) -> FleetResult<()> {
        let finished = self.finish(task_id, None).await?;
        if finished {
            metrics::counter!("fleet_tasks_completed_total").increment(1);
            self.events.emit(SchedulerEvent::TaskCompleted {
                task_id,
                at: Utc::now(),
            });
        }
        Ok(())
    }

    /// 节点上报任务失败
    pub async fn fail(&self, task_id: TaskId, reason: FailureReason) -> FleetResult<()> {
        let finished = self.finish(task_id, Some(reason)).await?;
        if finished {
            metrics::counter!("fleet_tasks_failed_total", "reason" => reason.to_string())
                .increment(1);
            self.events.emit(SchedulerEvent::TaskFailed {
                task_id,
                reason,
                at: Utc::now(),
            });
        }
        Ok(())
    }

    /// 终态转换并释放调度器侧预留；已处于终态的任务忽略本次上报
    async fn finish(&self, task_id: TaskId, failure: Option<FailureReason>) -> FleetResult<bool> {
        let task = self.tasks.get(task_id).await?;
        if task.is_terminal() {
            debug!(task_id = %task_id, status = ?task.status, "任务已处于终态，忽略上报");
            return Ok(false);
        }

        let handle = match task.assigned_node {
            Some(node_id) => self.registry.handle(node_id).await.ok(),
            None => None,
        };
        let mut entry = match &handle {
            Some(handle) => Some(handle.lock().await),
            None => None,
        };

        let transitioned = self
            .tasks
            .update(task_id, |record| {
                if record.is_terminal() {
                    return Ok(false);
                }
                match failure {
                    Some(reason) => record.fail(reason)?,
                    None => record.complete()?,
                }
                Ok(true)
            })
            .await?;

        if !transitioned {
            debug!(task_id = %task_id, "任务已被并发终结，忽略上报");
            return Ok(false);
        }

        if let Some(entry) = entry.as_mut() {
            entry.release_task(task_id);
        }

        match failure {
            Some(reason) => info!(task_id = %task_id, reason = %reason, "任务失败"),
            None => info!(task_id = %task_id, "任务完成"),
        }
        Ok(true)
    }

    pub async fn status(&self, task_id: TaskId) -> FleetResult<TaskRecord> {
        self.tasks.get(task_id).await
    }

    pub async fn node_info(&self, node_id: NodeId) -> FleetResult<NodeSnapshot> {
        self.registry.get(node_id).await
    }

    pub async fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            tasks: self.tasks.counts().await,
            ..Default::default()
        };
        for node in self.registry.snapshot().await {
            match node.record.status {
                NodeStatus::Active => stats.nodes_active += 1,
                NodeStatus::Inactive => stats.nodes_inactive += 1,
                NodeStatus::Maintenance => stats.nodes_maintenance += 1,
            }
        }
        stats
    }

    pub fn strategy_name(&self) -> &str {
        self.strategy.name()
    }
}
