use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::FleetResult;
use crate::models::{TaskId, TaskKind};

/// 一次后端调用的输入
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub input_ref: String,
    pub output_ref: String,
    pub model_ref: Option<String>,
    /// 任务存储区
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub output_location: String,
    pub duration_ms: u64,
}

/// 执行后端
///
/// 每种任务类型对应一个后端实现；后端只负责运行任务，
/// 资源预留、超时与上报都由执行器处理。
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &str;

    fn supports(&self, kind: TaskKind) -> bool;

    async fn execute(&self, request: &ExecutionRequest) -> FleetResult<ExecutionOutput>;
}
