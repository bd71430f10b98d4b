use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use fleet_core::{FailureReason, TaskId, TaskSpec};
use fleet_dispatcher::DispatcherService;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success},
};

#[derive(Debug, Deserialize)]
pub struct FailTaskRequest {
    pub reason: FailureReason,
}

fn parse_task_id(raw: &str) -> ApiResult<TaskId> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("无效的任务ID: {raw}")))
}

/// 提交任务
///
/// 找不到合适节点时任务仍会创建并立即标记为失败（NoSuitableNode），
/// 因此返回 201 和失败状态的任务记录，而不是错误。
pub async fn submit_task(
    State(service): State<Arc<DispatcherService>>,
    Json(spec): Json<TaskSpec>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(service.submit_task(spec).await?))
}

pub async fn list_tasks(State(service): State<Arc<DispatcherService>>) -> impl IntoResponse {
    success(service.tasks().await)
}

pub async fn get_task(
    State(service): State<Arc<DispatcherService>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task_id = parse_task_id(&id)?;
    Ok(success(service.task(task_id).await?))
}

/// 节点上报任务完成
pub async fn complete_task(
    State(service): State<Arc<DispatcherService>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task_id = parse_task_id(&id)?;
    Ok(success(service.complete_task(task_id).await?))
}

/// 节点上报任务失败
pub async fn fail_task(
    State(service): State<Arc<DispatcherService>>,
    Path(id): Path<String>,
    Json(request): Json<FailTaskRequest>,
) -> ApiResult<impl IntoResponse> {
    let task_id = parse_task_id(&id)?;
    Ok(success(service.fail_task(task_id, request.reason).await?))
}

pub async fn get_stats(State(service): State<Arc<DispatcherService>>) -> impl IntoResponse {
    success(service.stats().await)
}
