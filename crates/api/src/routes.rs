use std::sync::Arc;

use axum::{
    middleware::from_fn,
    routing::{get, post, put},
    Router,
};

use fleet_dispatcher::DispatcherService;
use fleet_node::NodeService;

use crate::handlers::{
    assignments::{node_status, receive_assignment},
    health::health_check,
    nodes::{
        deregister_node, get_node, list_nodes, node_heartbeat, register_node, set_maintenance,
    },
    tasks::{complete_task, fail_task, get_stats, get_task, list_tasks, submit_task},
};
use crate::middleware::{cors_layer, request_logging, trace_layer};

/// 调度器（账本服务）路由
pub fn dispatcher_routes(service: Arc<DispatcherService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        // 节点管理
        .route("/api/nodes", get(list_nodes).post(register_node))
        .route("/api/nodes/{id}", get(get_node).delete(deregister_node))
        .route("/api/nodes/{id}/heartbeat", post(node_heartbeat))
        .route("/api/nodes/{id}/maintenance", put(set_maintenance))
        // 任务管理与结果上报
        .route("/api/tasks", get(list_tasks).post(submit_task))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/complete", post(complete_task))
        .route("/api/tasks/{id}/fail", post(fail_task))
        .route("/api/stats", get(get_stats))
        .with_state(service)
}

/// 节点侧路由：接收分配通知与状态查询
pub fn node_routes(node: Arc<NodeService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/assignments", post(receive_assignment))
        .route("/api/status", get(node_status))
        .with_state(node)
}

/// 请求日志、HTTP 追踪，以及可选的 CORS
pub fn with_middleware(router: Router, cors_enabled: bool) -> Router {
    let router = router
        .layer(from_fn(request_logging))
        .layer(trace_layer());
    if cors_enabled {
        router.layer(cors_layer())
    } else {
        router
    }
}
