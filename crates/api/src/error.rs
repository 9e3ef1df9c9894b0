use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use jobstore_errors::JobStoreError;

/// API 错误类型，负责把调度器错误谱系映射到 HTTP 状态码
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("作业服务错误: {0}")]
    Job(#[from] JobStoreError),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("资源未找到")]
    NotFound,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Job(JobStoreError::JobNotRegistered { .. })
            | ApiError::Job(JobStoreError::JobInfoNotFound { .. }) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ApiError::Job(JobStoreError::JobAlreadyQueued { .. })
            | ApiError::Job(JobStoreError::JobAlreadyRunning { .. }) => {
                (StatusCode::CONFLICT, self.to_string())
            }
            ApiError::Job(JobStoreError::JobExecutionNotNecessary { .. })
            | ApiError::Job(JobStoreError::JobExecutionDisabled { .. }) => {
                (StatusCode::PRECONDITION_FAILED, self.to_string())
            }
            ApiError::Job(JobStoreError::JobServiceNotActive) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Job(JobStoreError::JobNotAbortable { .. }) => {
                (StatusCode::FORBIDDEN, self.to_string())
            }
            ApiError::Job(JobStoreError::Validation(_)) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, self.to_string()),
            ApiError::Job(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "内部服务器错误".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "message": message,
                "code": status.as_u16()
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: ApiError) -> StatusCode {
        error.into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_of(ApiError::Job(JobStoreError::JobNotRegistered {
                name: "x".to_string()
            })),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::Job(JobStoreError::JobAlreadyQueued {
                name: "x".to_string()
            })),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(ApiError::Job(JobStoreError::JobExecutionNotNecessary {
                name: "x".to_string()
            })),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            status_of(ApiError::Job(JobStoreError::JobExecutionDisabled {
                name: None
            })),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            status_of(ApiError::Job(JobStoreError::JobNotAbortable {
                name: "x".to_string()
            })),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(ApiError::Job(JobStoreError::JobServiceNotActive)),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(ApiError::Job(JobStoreError::Internal("boom".to_string()))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
