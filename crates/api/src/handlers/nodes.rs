use std::sync::Arc;

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use fleet_core::{NodeId, NodeRegistration};
use fleet_dispatcher::DispatcherService;

use crate::{
    error::{ApiError, ApiResult},
    response::{created, success, ApiResponse},
};

#[derive(Debug, Deserialize)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

fn parse_node_id(raw: &str) -> ApiResult<NodeId> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("无效的节点ID: {raw}")))
}

/// 节点注册
pub async fn register_node(
    State(service): State<Arc<DispatcherService>>,
    Json(registration): Json<NodeRegistration>,
) -> ApiResult<impl IntoResponse> {
    let node_id = service.register_node(registration).await?;
    let snapshot = service.node(node_id).await?;
    Ok(created(snapshot))
}

pub async fn list_nodes(State(service): State<Arc<DispatcherService>>) -> impl IntoResponse {
    success(service.nodes().await)
}

pub async fn get_node(
    State(service): State<Arc<DispatcherService>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let node_id = parse_node_id(&id)?;
    Ok(success(service.node(node_id).await?))
}

/// 注销节点；仍有运行中任务时拒绝
pub async fn deregister_node(
    State(service): State<Arc<DispatcherService>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let node_id = parse_node_id(&id)?;
    service.deregister_node(node_id).await?;
    Ok(ApiResponse::message_only(format!(
        "节点 {node_id} 已注销"
    )))
}

pub async fn node_heartbeat(
    State(service): State<Arc<DispatcherService>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let node_id = parse_node_id(&id)?;
    Ok(success(service.heartbeat(node_id).await?))
}

/// 进入或退出维护状态
pub async fn set_maintenance(
    State(service): State<Arc<DispatcherService>>,
    Path(id): Path<String>,
    Json(request): Json<MaintenanceRequest>,
) -> ApiResult<impl IntoResponse> {
    let node_id = parse_node_id(&id)?;
    Ok(success(
        service.set_maintenance(node_id, request.enabled).await?,
    ))
}
