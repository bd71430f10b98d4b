use std::collections::HashMap;

use serde::Serialize;
use tokio::sync::RwLock;

use fleet_core::{FleetError, FleetResult, TaskId, TaskRecord, TaskStatus};

/// 各状态任务数量
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// 任务存储
///
/// 任务记录在到达终态后仍然保留。所有修改都经由 [`TaskStore::update`]
/// 在写锁内完成，闭包返回错误时记录保持原状。
#[derive(Default)]
pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: TaskRecord) -> FleetResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&record.id) {
            return Err(FleetError::validation(format!("任务已存在: {}", record.id)));
        }
        tasks.insert(record.id, record);
        Ok(())
    }

    pub async fn get(&self, id: TaskId) -> FleetResult<TaskRecord> {
        self.tasks
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(FleetError::task_not_found(id))
    }

    pub async fn update<R>(
        &self,
        id: TaskId,
        f: impl FnOnce(&mut TaskRecord) -> FleetResult<R>,
    ) -> FleetResult<R> {
        let mut tasks = self.tasks.write().await;
        let record = tasks.get_mut(&id).ok_or(FleetError::task_not_found(id))?;
        f(record)
    }

    pub async fn list(&self) -> Vec<TaskRecord> {
        self.tasks.read().await.values().cloned().collect()
    }

    pub async fn counts(&self) -> TaskCounts {
        let tasks = self.tasks.read().await;
        let mut counts = TaskCounts::default();
        for record in tasks.values() {
            match record.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}
