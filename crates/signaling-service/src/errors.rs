//! Front-door error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl.
//! Messages returned to clients are intentionally generic where the cause
//! is internal; the actual error is logged server-side. Rate-limit
//! rejections additionally carry the `rateLimit` object so clients can
//! back off using `resetAt`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::ratelimit::RateLimitDecision;

/// Front-door error type.
///
/// Maps to HTTP status codes:
/// - `Unauthorized`: 401
/// - `Forbidden`, `DevIssuerDisabled`: 403
/// - `NotFound`: 404
/// - `BadRequest`: 400
/// - `ExpectedWebSocket`: 426
/// - `RateLimited`: 429
/// - `RateLimiterUnavailable`: 503
/// - `Internal`: 500
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden")]
    Forbidden,

    #[error("Dev token issuer is disabled")]
    DevIssuerDisabled,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Expected a WebSocket upgrade")]
    ExpectedWebSocket,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limit exceeded")]
    RateLimited(RateLimitDecision),

    #[error("Rate limiter unavailable")]
    RateLimiterUnavailable,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden | ApiError::DevIssuerDisabled => 403,
            ApiError::NotFound(_) => 404,
            ApiError::ExpectedWebSocket => 426,
            ApiError::RateLimited(_) => 429,
            ApiError::Internal(_) => 500,
            ApiError::RateLimiterUnavailable => 503,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
    #[serde(rename = "rateLimit", skip_serializing_if = "Option::is_none")]
    rate_limit: Option<RateLimitDecision>,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, rate_limit) = match self {
            ApiError::Unauthorized(reason) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                reason,
                None,
            ),
            ApiError::Forbidden => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Forbidden".to_string(),
                None,
            ),
            ApiError::DevIssuerDisabled => (
                StatusCode::FORBIDDEN,
                "DEV_ISSUER_DISABLED",
                "The dev token issuer is disabled".to_string(),
                None,
            ),
            ApiError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason, None)
            }
            ApiError::ExpectedWebSocket => (
                StatusCode::UPGRADE_REQUIRED,
                "EXPECTED_WEBSOCKET",
                "This endpoint requires a WebSocket upgrade".to_string(),
                None,
            ),
            ApiError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", resource, None)
            }
            ApiError::RateLimited(decision) => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Too many requests. Retry after the window resets.".to_string(),
                Some(decision),
            ),
            ApiError::RateLimiterUnavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                "RATE_LIMIT_ERROR",
                "Rate limiter unavailable, try again later".to_string(),
                None,
            ),
            ApiError::Internal(detail) => {
                // Log the detail server-side, return a generic message
                tracing::error!(target: "signal.http", error = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
            rate_limit,
        };

        (status, Json(body)).into_response()
    }
}
