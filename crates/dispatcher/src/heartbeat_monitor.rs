use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use fleet_core::{
    EventSink, FailureReason, NodeId, NodeStatus, SchedulerEvent, TaskId, TaskStatus,
};

use crate::registry::NodeRegistry;
use crate::task_store::TaskStore;

/// 心跳监控配置
#[derive(Debug, Clone)]
pub struct HeartbeatMonitorConfig {
    /// 心跳周期（秒），同时也是巡检周期
    pub heartbeat_interval_seconds: u64,
    /// 超过多少个心跳周期未收到心跳视为失联
    pub missed_heartbeats: u32,
}

impl Default for HeartbeatMonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_seconds: 30,
            missed_heartbeats: 2,
        }
    }
}

impl HeartbeatMonitorConfig {
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(
            (self.heartbeat_interval_seconds * u64::from(self.missed_heartbeats)) as i64,
        )
    }
}

/// 一次巡检的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub demoted_nodes: Vec<NodeId>,
    pub failed_tasks: Vec<TaskId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.demoted_nodes.is_empty() && self.failed_tasks.is_empty()
    }
}

/// 心跳监控
///
/// 周期性检查节点最后心跳时间，把失联节点置为 Inactive，
/// 并在同一个节点锁内把其上运行中的任务标记为失败、释放调度器侧预留。
pub struct HeartbeatMonitor {
    registry: Arc<NodeRegistry>,
    tasks: Arc<TaskStore>,
    events: EventSink,
    config: HeartbeatMonitorConfig,
    stop_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new(
        registry: Arc<NodeRegistry>,
        tasks: Arc<TaskStore>,
        events: EventSink,
        config: Option<HeartbeatMonitorConfig>,
    ) -> Self {
        let (stop_tx, _) = broadcast::channel(1);
        Self {
            registry,
            tasks,
            events,
            config: config.unwrap_or_default(),
            stop_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HeartbeatMonitorConfig {
        &self.config
    }

    /// 执行一次巡检
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let timeout = self.config.timeout();
        let mut report = SweepReport::default();

        for (node_id, handle) in self.registry.handles().await {
            let mut entry = handle.lock().await;
            if entry.record.status != NodeStatus::Active
                || !entry.record.is_heartbeat_expired(now, timeout)
            {
                continue;
            }

            warn!(
                node_id = %node_id,
                last_heartbeat = %entry.record.last_heartbeat_at,
                running_tasks = entry.running.len(),
                "节点心跳超时，标记为失联"
            );
            entry.record.status = NodeStatus::Inactive;
            report.demoted_nodes.push(node_id);
            metrics::counter!("fleet_nodes_demoted_total").increment(1);
            self.events.emit(SchedulerEvent::NodeFailed { node_id, at: now });

            let running: Vec<TaskId> = entry.running.keys().copied().collect();
            for task_id in running {
                let failed = self
                    .tasks
                    .update(task_id, |record| {
                        if record.status != TaskStatus::Running {
                            return Ok(false);
                        }
                        record.fail(FailureReason::NodeUnavailable)?;
                        Ok(true)
                    })
                    .await;

                match failed {
                    Ok(true) => {
                        report.failed_tasks.push(task_id);
                        metrics::counter!(
                            "fleet_tasks_failed_total",
                            "reason" => FailureReason::NodeUnavailable.to_string()
                        )
                        .increment(1);
                        self.events.emit(SchedulerEvent::TaskFailed {
                            task_id,
                            reason: FailureReason::NodeUnavailable,
                            at: now,
                        });
                    }
                    Ok(false) => {
                        debug!(task_id = %task_id, "任务已处于终态，仅释放预留");
                    }
                    Err(e) => {
                        error!(task_id = %task_id, "标记失联节点上的任务失败时出错: {}", e);
                    }
                }
                entry.release_task(task_id);
            }
        }

        if !report.is_empty() {
            info!(
                "心跳巡检完成: {} 个节点失联, {} 个任务失败",
                report.demoted_nodes.len(),
                report.failed_tasks.len()
            );
        }
        report
    }

    /// 启动周期巡检
    pub async fn start(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut guard = self.handle.lock().await;
        if guard.is_some() {
            warn!("心跳监控已在运行");
            return;
        }

        let monitor = Arc::clone(self);
        let mut stop_rx = self.stop_tx.subscribe();
        let period = Duration::from_secs(self.config.heartbeat_interval_seconds);

        *guard = Some(tokio::spawn(async move {
            info!(
                "启动心跳监控，巡检间隔 {:?}，失联阈值 {} 秒",
                period,
                monitor.config.timeout().num_seconds()
            );
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.sweep(Utc::now()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("收到停止信号，退出心跳监控循环");
                        break;
                    }
                    _ = stop_rx.recv() => {
                        info!("心跳监控已停止");
                        break;
                    }
                }
            }
        }));
    }

    /// 停止巡检并等待循环退出
    pub async fn stop(&self) {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            let _ = self.stop_tx.send(());
            if let Err(e) = handle.await {
                error!("心跳监控任务异常退出: {}", e);
            }
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
