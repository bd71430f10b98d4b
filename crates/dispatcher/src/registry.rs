use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use fleet_core::{
    EventSink, FleetError, FleetResult, NodeId, NodeRecord, NodeRegistration, NodeStatus,
    ResourceLedger, ResourceVector, SchedulerEvent, TaskId,
};

/// 注册表中的单个节点条目
///
/// 节点记录、调度器侧的预留账本和运行中任务集合由同一把锁保护。
/// 心跳、巡检和分配都先获取这把锁，再访问任务存储。
#[derive(Debug)]
pub struct NodeEntry {
    pub record: NodeRecord,
    pub ledger: ResourceLedger,
    pub running: HashMap<TaskId, ResourceVector>,
}

impl NodeEntry {
    fn new(record: NodeRecord) -> Self {
        let ledger = ResourceLedger::new(record.capability.capacity());
        Self {
            record,
            ledger,
            running: HashMap::new(),
        }
    }

    /// 释放某个任务在本节点上的预留；任务不在运行集合中时返回 false
    pub fn release_task(&mut self, task_id: TaskId) -> bool {
        let Some(request) = self.running.remove(&task_id) else {
            return false;
        };
        let outcome = self.ledger.release(&request);
        if !outcome.is_consistent() {
            warn!(
                node_id = %self.record.id,
                task_id = %task_id,
                over_released = ?outcome.over_released,
                "调度器侧账本释放超出已用量"
            );
            metrics::counter!("fleet_ledger_inconsistencies_total", "side" => "dispatcher")
                .increment(1);
        }
        true
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            record: self.record.clone(),
            total: self.ledger.total(),
            used: self.ledger.used(),
            running_tasks: self.running.keys().copied().collect(),
        }
    }
}

pub type NodeHandle = Arc<Mutex<NodeEntry>>;

/// 节点的只读视图
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    #[serde(flatten)]
    pub record: NodeRecord,
    pub total: ResourceVector,
    pub used: ResourceVector,
    pub running_tasks: Vec<TaskId>,
}

impl NodeSnapshot {
    pub fn headroom(&self) -> ResourceVector {
        self.total.saturating_sub(&self.used)
    }
}

/// 节点注册表
pub struct NodeRegistry {
    nodes: RwLock<BTreeMap<NodeId, NodeHandle>>,
    next_id: AtomicU64,
    events: EventSink,
}

impl NodeRegistry {
    pub fn new(events: EventSink) -> Self {
        Self {
            nodes: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            events,
        }
    }

    /// 注册节点，返回新分配的节点ID
    pub async fn register(&self, registration: NodeRegistration) -> FleetResult<NodeId> {
        registration.capability.validate()?;
        if registration.address.trim().is_empty() {
            return Err(FleetError::validation("节点地址不能为空"));
        }

        let now = Utc::now();
        let id = NodeId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let record = NodeRecord::new(id, registration, now);
        let address = record.address.clone();

        info!(
            node_id = %id,
            address = %address,
            accelerator = %record.capability.accelerator_type,
            compute = record.capability.compute_power_units,
            memory = record.capability.memory_bytes,
            "节点注册成功"
        );

        self.nodes
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(NodeEntry::new(record))));

        metrics::counter!("fleet_nodes_registered_total").increment(1);
        self.events.emit(SchedulerEvent::NodeRegistered {
            node_id: id,
            address,
            at: now,
        });
        Ok(id)
    }

    /// 注销节点；仍有运行中任务的节点不能注销
    pub async fn deregister(&self, id: NodeId) -> FleetResult<()> {
        let mut nodes = self.nodes.write().await;
        let handle = nodes.get(&id).cloned().ok_or(FleetError::node_not_found(id))?;

        let entry = handle.lock().await;
        if !entry.running.is_empty() {
            return Err(FleetError::validation(format!(
                "节点 {} 仍有 {} 个运行中的任务，无法注销",
                id,
                entry.running.len()
            )));
        }
        drop(entry);

        nodes.remove(&id);
        info!(node_id = %id, "节点已注销");
        Ok(())
    }

    /// 运维操作：进入或退出维护状态
    pub async fn set_maintenance(
        &self,
        id: NodeId,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> FleetResult<NodeRecord> {
        let handle = self.handle(id).await?;
        let mut entry = handle.lock().await;

        if enabled {
            entry.record.status = NodeStatus::Maintenance;
            info!(node_id = %id, "节点进入维护状态");
        } else if entry.record.status == NodeStatus::Maintenance {
            entry.record.status = NodeStatus::Active;
            if now > entry.record.last_heartbeat_at {
                entry.record.last_heartbeat_at = now;
            }
            info!(node_id = %id, "节点退出维护状态");
        }

        Ok(entry.record.clone())
    }

    /// 记录心跳
    ///
    /// 时间戳只前进不后退，早于当前记录的心跳被忽略。
    /// 失联节点收到有效心跳后自动恢复为 Active；维护状态不会被心跳改变。
    pub async fn record_heartbeat(&self, id: NodeId, at: DateTime<Utc>) -> FleetResult<NodeRecord> {
        let handle = self.handle(id).await?;
        let mut entry = handle.lock().await;

        if at < entry.record.last_heartbeat_at {
            debug!(
                node_id = %id,
                received = %at,
                current = %entry.record.last_heartbeat_at,
                "忽略过期的心跳"
            );
            return Ok(entry.record.clone());
        }

        entry.record.last_heartbeat_at = at;

        if entry.record.status == NodeStatus::Inactive {
            entry.record.status = NodeStatus::Active;
            info!(node_id = %id, "节点心跳恢复，重新激活");
            metrics::counter!("fleet_nodes_recovered_total").increment(1);
            self.events.emit(SchedulerEvent::NodeRecovered { node_id: id, at });
        }

        Ok(entry.record.clone())
    }

    pub async fn handle(&self, id: NodeId) -> FleetResult<NodeHandle> {
        self.nodes
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(FleetError::node_not_found(id))
    }

    /// 按节点ID升序返回所有条目句柄
    pub async fn handles(&self) -> Vec<(NodeId, NodeHandle)> {
        self.nodes
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, Arc::clone(handle)))
            .collect()
    }

    pub async fn get(&self, id: NodeId) -> FleetResult<NodeSnapshot> {
        let handle = self.handle(id).await?;
        let entry = handle.lock().await;
        Ok(entry.snapshot())
    }

    pub async fn snapshot(&self) -> Vec<NodeSnapshot> {
        let mut snapshots = Vec::new();
        for (_, handle) in self.handles().await {
            snapshots.push(handle.lock().await.snapshot());
        }
        snapshots
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }
}
