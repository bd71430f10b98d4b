use axum::{http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 统一响应信封
///
/// 节点侧的 `HttpLedgerClient` 按同样的结构解析调度器的应答，
/// 错误应答见 [`crate::error::ApiError`]。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T: Serialize> ApiResponse<T> {
    fn envelope(data: Option<T>, message: Option<String>) -> Self {
        Self {
            success: true,
            data,
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn success(data: T) -> Self {
        Self::envelope(Some(data), None)
    }
}

impl ApiResponse<()> {
    /// 只有提示信息、没有数据的应答（注销节点、接收分配通知）
    pub fn message_only(message: impl Into<String>) -> Self {
        Self::envelope(None, Some(message.into()))
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

pub fn success<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::OK, ApiResponse::success(data))
}

pub fn created<T: Serialize>(data: T) -> impl IntoResponse {
    (StatusCode::CREATED, ApiResponse::success(data))
}

pub fn accepted(message: impl Into<String>) -> impl IntoResponse {
    (StatusCode::ACCEPTED, ApiResponse::message_only(message))
}
