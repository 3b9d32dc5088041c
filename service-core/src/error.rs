use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Stable machine-readable reason codes carried in every error body.
pub mod reason {
    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    pub const INVALID_CODE: &str = "INVALID_CODE";
    pub const DEVICE_LOCKED: &str = "DEVICE_LOCKED";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const RATE_LIMIT: &str = "RATE_LIMIT";
    pub const QUOTA_EXCEEDED: &str = "QUOTA_EXCEEDED";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const UPSTREAM_ERROR: &str = "UPSTREAM_ERROR";
    pub const SERVER_ERROR: &str = "SERVER_ERROR";
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Bad request: {0}")]
    BadRequest(anyhow::Error),

    #[error("Invalid access code")]
    InvalidCode,

    #[error("Access code is already in use on another device")]
    DeviceLocked,

    #[error("Unauthorized: {0}")]
    Unauthorized(anyhow::Error),

    #[error("Too many requests: {0}")]
    TooManyRequests(String, Option<u64>),

    #[error("Daily quota exceeded")]
    QuotaExceeded { retry_after: Option<u64> },

    #[error("Upstream did not answer within {timeout_ms} ms")]
    GatewayTimeout {
        timeout_ms: u64,
        retry_token: Option<String>,
    },

    #[error("Bad Gateway: {0}")]
    BadGateway(String),

    #[error("Service Unavailable")]
    ServiceUnavailable,

    #[error("Internal server error: {0}")]
    InternalError(#[from] anyhow::Error),

    #[error("Database error: {0}")]
    DatabaseError(anyhow::Error),

    #[error("Cache error: {0}")]
    CacheError(anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(anyhow::Error),
}

impl AppError {
    /// Reason code reported to the caller for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) | AppError::BadRequest(_) => reason::INVALID_INPUT,
            AppError::InvalidCode => reason::INVALID_CODE,
            AppError::DeviceLocked => reason::DEVICE_LOCKED,
            AppError::Unauthorized(_) => reason::UNAUTHORIZED,
            AppError::TooManyRequests(..) => reason::RATE_LIMIT,
            AppError::QuotaExceeded { .. } => reason::QUOTA_EXCEEDED,
            AppError::GatewayTimeout { .. } => reason::TIMEOUT,
            AppError::BadGateway(_) => reason::UPSTREAM_ERROR,
            AppError::ServiceUnavailable
            | AppError::InternalError(_)
            | AppError::DatabaseError(_)
            | AppError::CacheError(_)
            | AppError::ConfigError(_) => reason::SERVER_ERROR,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidCode | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::DeviceLocked => StatusCode::FORBIDDEN,
            AppError::TooManyRequests(..) | AppError::QuotaExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::GatewayTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InternalError(_)
            | AppError::DatabaseError(_)
            | AppError::CacheError(_)
            | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(anyhow::Error::new(err))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(anyhow::Error::new(err))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(anyhow::Error::new(err))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::CacheError(anyhow::Error::new(err))
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_token: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.reason_code();

        let (message, details, retry_after, retry_token) = match self {
            AppError::ValidationError(err) => (
                "Validation error".to_string(),
                Some(err.to_string()),
                None,
                None,
            ),
            AppError::BadRequest(err) => (err.to_string(), None, None, None),
            AppError::InvalidCode => ("Invalid access code".to_string(), None, None, None),
            AppError::DeviceLocked => (
                "This access code is already in use on another device".to_string(),
                None,
                None,
                None,
            ),
            AppError::Unauthorized(err) => (err.to_string(), None, None, None),
            AppError::TooManyRequests(msg, retry) => (msg, None, retry, None),
            AppError::QuotaExceeded { retry_after } => (
                "Daily generation quota exceeded".to_string(),
                None,
                retry_after,
                None,
            ),
            AppError::GatewayTimeout {
                timeout_ms,
                retry_token,
            } => (
                format!("Upstream did not answer within {} ms", timeout_ms),
                None,
                None,
                retry_token,
            ),
            AppError::BadGateway(msg) => (format!("Bad Gateway: {}", msg), None, None, None),
            AppError::ServiceUnavailable => {
                ("Service unavailable".to_string(), None, None, None)
            }
            AppError::InternalError(err) => {
                tracing::error!(error = %format!("{:#}", err), "Internal server error");
                ("Internal server error".to_string(), None, None, None)
            }
            AppError::DatabaseError(err) => {
                tracing::error!(error = %err, "Database error");
                ("Database error".to_string(), None, None, None)
            }
            AppError::CacheError(err) => {
                tracing::error!(error = %err, "Cache error");
                ("Cache error".to_string(), None, None, None)
            }
            AppError::ConfigError(err) => {
                tracing::error!(error = %err, "Configuration error");
                ("Configuration error".to_string(), None, None, None)
            }
        };

        let mut res = (
            status,
            Json(ErrorResponse {
                error: code,
                message,
                details,
                retry_after_secs: retry_after,
                retry_token,
            }),
        )
            .into_response();

        if let Some(retry) = retry_after {
            res.headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry.into());
        }

        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_json(res: Response) -> serde_json::Value {
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limit_sets_retry_after() {
        let res = AppError::TooManyRequests("slow down".to_string(), Some(42)).into_response();
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(res.headers()[axum::http::header::RETRY_AFTER], "42");

        let body = body_json(res).await;
        assert_eq!(body["error"], "RATE_LIMIT");
        assert_eq!(body["retry_after_secs"], 42);
    }

    #[tokio::test]
    async fn test_timeout_carries_retry_token() {
        let res = AppError::GatewayTimeout {
            timeout_ms: 500,
            retry_token: Some("tok".to_string()),
        }
        .into_response();
        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);

        let body = body_json(res).await;
        assert_eq!(body["error"], "TIMEOUT");
        assert_eq!(body["retry_token"], "tok");
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let res = AppError::InternalError(anyhow::anyhow!("connection string leaked")).into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = body_json(res).await;
        assert_eq!(body["error"], "SERVER_ERROR");
        assert!(body.get("details").is_none());
        assert!(!body.to_string().contains("connection string"));
    }

    #[test]
    fn test_auth_errors_map_to_distinct_codes() {
        assert_eq!(AppError::InvalidCode.reason_code(), "INVALID_CODE");
        assert_eq!(AppError::DeviceLocked.reason_code(), "DEVICE_LOCKED");
        assert_eq!(AppError::DeviceLocked.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::QuotaExceeded { retry_after: None }.reason_code(),
            "QUOTA_EXCEEDED"
        );
    }
}
