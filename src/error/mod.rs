use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error types
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Invalid resource key: {0}")]
    InvalidKey(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64, limit: u32 },

    #[error("Resource not found")]
    NotFound,

    #[error("Resource already exists: {0}")]
    Conflict(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidKey(_) => StatusCode::BAD_REQUEST,
            GatewayError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::NotFound => StatusCode::NOT_FOUND,
            GatewayError::Conflict(_) => StatusCode::CONFLICT,
            GatewayError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable error code rendered in the response body
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::InvalidKey(_) => "invalid_key",
            GatewayError::InvalidPayload(_) => "invalid_payload",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::NotFound => "not_found",
            GatewayError::Conflict(_) => "conflict",
            GatewayError::Unavailable(_) => "unavailable",
            GatewayError::Config(_) | GatewayError::Io(_) | GatewayError::Internal(_) => {
                "internal"
            }
        }
    }

    /// Render this error, optionally attaching the diagnostic message.
    ///
    /// Diagnostic detail is only attached outside production deployments.
    pub fn into_response_with_detail(self, expose_detail: bool) -> Response {
        let status = self.status_code();
        let mut body = json!({ "error": self.code() });
        if expose_detail {
            body["detail"] = json!(self.to_string());
        }

        let mut response = (status, Json(body)).into_response();

        if let GatewayError::RateLimited { retry_after, limit } = self {
            let headers = response.headers_mut();
            headers.insert(
                "Retry-After",
                HeaderValue::from(retry_after.max(1)),
            );
            headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
        }

        response
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        self.into_response_with_detail(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            GatewayError::InvalidKey("AB!".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(GatewayError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::Conflict("shop".to_string()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            GatewayError::Unavailable("redis".to_string()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::RateLimited {
                retry_after: 3,
                limit: 20
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(GatewayError::InvalidPayload("x".into()).code(), "invalid_payload");
        assert_eq!(GatewayError::Internal("boom".into()).code(), "internal");
        assert_eq!(GatewayError::Config("bad".into()).code(), "internal");
    }

    #[test]
    fn test_rate_limited_response_headers() {
        let response = GatewayError::RateLimited {
            retry_after: 7,
            limit: 20,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "7");
        assert_eq!(response.headers().get("X-RateLimit-Limit").unwrap(), "20");
    }

    #[test]
    fn test_retry_after_never_zero() {
        let response = GatewayError::RateLimited {
            retry_after: 0,
            limit: 5,
        }
        .into_response();

        assert_eq!(response.headers().get("Retry-After").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_internal_detail_hidden_by_default() {
        let response = GatewayError::Internal("pool exhausted".to_string()).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["error"], "internal");
        assert!(value.get("detail").is_none());
    }

    #[tokio::test]
    async fn test_internal_detail_exposed_on_request() {
        let response = GatewayError::Internal("pool exhausted".to_string())
            .into_response_with_detail(true);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(value["detail"], "Internal server error: pool exhausted");
    }
}
