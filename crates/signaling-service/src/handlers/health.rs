//! Health check handler.

use axum::Json;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    /// Current server time, epoch milliseconds.
    pub now: i64,
}

/// `GET /health` - liveness probe.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        now: chrono::Utc::now().timestamp_millis(),
    })
}
