use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

use crate::models::{FailureReason, NodeId, TaskId};

/// 调度事件
///
/// 由注册表、调度器和心跳监控发出；`TaskAssigned` 会被转发给目标节点。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    NodeRegistered {
        node_id: NodeId,
        address: String,
        at: DateTime<Utc>,
    },
    NodeFailed {
        node_id: NodeId,
        at: DateTime<Utc>,
    },
    NodeRecovered {
        node_id: NodeId,
        at: DateTime<Utc>,
    },
    TaskAssigned {
        task_id: TaskId,
        node_id: NodeId,
        node_address: String,
        at: DateTime<Utc>,
    },
    TaskFailed {
        task_id: TaskId,
        reason: FailureReason,
        at: DateTime<Utc>,
    },
    TaskCompleted {
        task_id: TaskId,
        at: DateTime<Utc>,
    },
}

impl SchedulerEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SchedulerEvent::NodeRegistered { .. } => "NodeRegistered",
            SchedulerEvent::NodeFailed { .. } => "NodeFailed",
            SchedulerEvent::NodeRecovered { .. } => "NodeRecovered",
            SchedulerEvent::TaskAssigned { .. } => "TaskAssigned",
            SchedulerEvent::TaskFailed { .. } => "TaskFailed",
            SchedulerEvent::TaskCompleted { .. } => "TaskCompleted",
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SchedulerEvent::NodeRegistered { at, .. }
            | SchedulerEvent::NodeFailed { at, .. }
            | SchedulerEvent::NodeRecovered { at, .. }
            | SchedulerEvent::TaskAssigned { at, .. }
            | SchedulerEvent::TaskFailed { at, .. }
            | SchedulerEvent::TaskCompleted { at, .. } => *at,
        }
    }
}

/// 事件发送端，接收端关闭后事件被丢弃
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: mpsc::UnboundedSender<SchedulerEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SchedulerEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn emit(&self, event: SchedulerEvent) {
        let event_type = event.event_type();
        if self.sender.send(event).is_err() {
            trace!(event_type, "事件接收端已关闭，丢弃事件");
        }
    }
}

/// 推送给节点的任务分配通知
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentNotice {
    pub task_id: TaskId,
    pub node_address: String,
}
