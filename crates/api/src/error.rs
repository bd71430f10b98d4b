use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleet_core::FleetError;
use serde_json::json;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Fleet(#[from] FleetError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Fleet(FleetError::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Fleet(FleetError::NodeNotFound { .. })
            | ApiError::Fleet(FleetError::TaskNotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Fleet(FleetError::NoSuitableNode { .. })
            | ApiError::Fleet(FleetError::ResourceExhausted(_))
            | ApiError::Fleet(FleetError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            ApiError::Fleet(FleetError::NodeUnavailable { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Fleet(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Fleet(e) => match e {
                FleetError::Validation(_) => "VALIDATION_ERROR",
                FleetError::NoSuitableNode { .. } => "NO_SUITABLE_NODE",
                FleetError::ResourceExhausted(_) => "RESOURCE_EXHAUSTED",
                FleetError::NodeUnavailable { .. } => "NODE_UNAVAILABLE",
                FleetError::NodeNotFound { .. } => "NODE_NOT_FOUND",
                FleetError::TaskNotFound { .. } => "TASK_NOT_FOUND",
                FleetError::InvalidTransition { .. } => "INVALID_TRANSITION",
                _ => "INTERNAL_ERROR",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error_type = self.error_type(), "请求处理失败: {}", self);
        }

        let body = Json(json!({
            "success": false,
            "data": null,
            "message": self.to_string(),
            "error": {
                "type": self.error_type(),
                "code": status.as_u16(),
            },
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}
