use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, Json};

use fleet_core::AssignmentNotice;
use fleet_node::NodeService;

use crate::{
    error::ApiResult,
    response::{accepted, success},
};

/// 接收调度器推送的分配通知，交给节点的接收循环异步处理
pub async fn receive_assignment(
    State(node): State<Arc<NodeService>>,
    Json(notice): Json<AssignmentNotice>,
) -> ApiResult<impl IntoResponse> {
    let task_id = notice.task_id;
    node.enqueue(notice)?;
    Ok(accepted(format!("任务 {task_id} 已进入接收队列")))
}

pub async fn node_status(State(node): State<Arc<NodeService>>) -> impl IntoResponse {
    success(node.status().await)
}
