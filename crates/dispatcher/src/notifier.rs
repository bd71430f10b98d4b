use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fleet_core::{
    AssignmentNotice, FailureReason, FleetError, FleetResult, SchedulerEvent,
};

use crate::scheduler::TaskScheduler;

/// 任务分配通知的推送方式
#[async_trait]
pub trait AssignmentNotifier: Send + Sync {
    async fn notify(&self, notice: &AssignmentNotice) -> FleetResult<()>;

    fn name(&self) -> &str;
}

/// 通过 HTTP 把分配通知推送到节点的 `/api/assignments`
pub struct HttpAssignmentNotifier {
    client: reqwest::Client,
}

impl HttpAssignmentNotifier {
    pub fn new(timeout: Duration) -> FleetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FleetError::Network(format!("创建HTTP客户端失败: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssignmentNotifier for HttpAssignmentNotifier {
    async fn notify(&self, notice: &AssignmentNotice) -> FleetResult<()> {
        let url = format!(
            "{}/api/assignments",
            notice.node_address.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .json(notice)
            .send()
            .await
            .map_err(|e| FleetError::Network(format!("推送分配通知到 {url} 失败: {e}")))?;

        if !response.status().is_success() {
            return Err(FleetError::Network(format!(
                "节点拒绝分配通知: {} 返回 {}",
                url,
                response.status()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// 进程内推送，节点与调度器运行在同一进程时使用
pub struct ChannelAssignmentNotifier {
    sender: mpsc::UnboundedSender<AssignmentNotice>,
}

impl ChannelAssignmentNotifier {
    pub fn new(sender: mpsc::UnboundedSender<AssignmentNotice>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl AssignmentNotifier for ChannelAssignmentNotifier {
    async fn notify(&self, notice: &AssignmentNotice) -> FleetResult<()> {
        self.sender
            .send(notice.clone())
            .map_err(|_| FleetError::Network("节点接收通道已关闭".to_string()))
    }

    fn name(&self) -> &str {
        "channel"
    }
}

/// 分配通知转发
///
/// 消费调度事件流，把 `TaskAssigned` 转发给目标节点。
/// 推送失败的任务以 NodeUnavailable 失败，释放调度器侧预留。
pub struct AssignmentRelay {
    scheduler: Arc<TaskScheduler>,
    notifier: Arc<dyn AssignmentNotifier>,
    events: Mutex<Option<mpsc::UnboundedReceiver<SchedulerEvent>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AssignmentRelay {
    pub fn new(
        scheduler: Arc<TaskScheduler>,
        notifier: Arc<dyn AssignmentNotifier>,
        events: mpsc::UnboundedReceiver<SchedulerEvent>,
    ) -> Self {
        Self {
            scheduler,
            notifier,
            events: Mutex::new(Some(events)),
            handle: Mutex::new(None),
        }
    }

    /// 处理单个事件
    pub async fn handle_event(&self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::TaskAssigned {
                task_id,
                node_id,
                node_address,
                ..
            } => {
                let notice = AssignmentNotice {
                    task_id,
                    node_address,
                };
                match self.notifier.notify(&notice).await {
                    Ok(()) => {
                        debug!(task_id = %task_id, node_id = %node_id, notifier = self.notifier.name(), "分配通知已送达");
                    }
                    Err(e) => {
                        warn!(task_id = %task_id, node_id = %node_id, "分配通知推送失败，任务将被标记失败: {}", e);
                        if let Err(e) = self
                            .scheduler
                            .fail(task_id, FailureReason::NodeUnavailable)
                            .await
                        {
                            error!(task_id = %task_id, "标记任务失败时出错: {}", e);
                        }
                    }
                }
            }
            other => {
                debug!(
                    event_type = other.event_type(),
                    occurred_at = %other.occurred_at(),
                    "调度事件"
                );
            }
        }
    }

    pub async fn start(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> FleetResult<()> {
        let mut events = self
            .events
            .lock()
            .await
            .take()
            .ok_or_else(|| FleetError::Internal("分配通知转发已启动".to_string()))?;

        let relay = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!(notifier = relay.notifier.name(), "启动分配通知转发");
            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Some(event) => relay.handle_event(event).await,
                            None => break,
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("分配通知转发退出");
                        break;
                    }
                }
            }
        });
        *self.handle.lock().await = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}
