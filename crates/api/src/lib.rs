//! HTTP 接口层
//!
//! 调度器一侧暴露节点注册、心跳、任务提交与结果上报；
//! 节点一侧暴露分配通知接收与状态查询。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;
pub use routes::{dispatcher_routes, node_routes, with_middleware};
