//! Error types for the callable surface
//!
//! Every failure reaches the caller as `{"error": {"code", "message"}}`.
//! Internal failures are logged with full detail and answered with a generic
//! message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing field or malformed payload (400)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Referenced lead or task absent (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Concurrent update could not be completed (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<afc_common::Error> for ApiError {
    fn from(err: afc_common::Error) -> Self {
        match err {
            afc_common::Error::Validation(msg) => ApiError::InvalidArgument(msg),
            afc_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            afc_common::Error::Conflict(msg) => ApiError::Conflict(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidArgument(_) => "invalid-argument",
            ApiError::NotFound(_) => "not-found",
            ApiError::Conflict(_) => "conflict",
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "Request failed with internal error");
                "An internal error occurred".to_string()
            }
            ApiError::InvalidArgument(msg) | ApiError::NotFound(msg) | ApiError::Conflict(msg) => {
                msg.clone()
            }
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (self.status(), body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[test]
    fn test_store_errors_map_to_codes() {
        let err: ApiError = afc_common::Error::Validation("name is required".into()).into();
        assert_eq!(err.code(), "invalid-argument");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let err: ApiError = afc_common::Error::NotFound("lead x".into()).into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err: ApiError = afc_common::Error::Config("bad".into()).into();
        assert_eq!(err.code(), "internal");
    }

    #[tokio::test]
    async fn test_internal_detail_is_not_leaked() {
        let response = ApiError::Internal("disk I/O error at /var/db".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "internal");
        assert!(!json["error"]["message"].as_str().unwrap().contains("/var/db"));
    }
}
