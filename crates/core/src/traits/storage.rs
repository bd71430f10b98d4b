use std::path::PathBuf;

use async_trait::async_trait;

use crate::errors::FleetResult;
use crate::models::TaskId;

/// 任务本地存储
///
/// 每个任务拥有独立的存储区，写入受总配额约束。
#[async_trait]
pub trait TaskStorage: Send + Sync {
    /// 创建任务存储区并返回其路径
    async fn create_area(&self, task_id: TaskId) -> FleetResult<PathBuf>;

    async fn write(&self, task_id: TaskId, name: &str, data: &[u8]) -> FleetResult<()>;

    async fn read(&self, task_id: TaskId, name: &str) -> FleetResult<Vec<u8>>;

    async fn delete_area(&self, task_id: TaskId) -> FleetResult<()>;

    /// 当前已使用的字节数
    async fn usage_bytes(&self) -> FleetResult<u64>;
}
