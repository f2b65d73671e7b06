//! HTTP and WebSocket handlers for the front door.

pub mod health;
pub mod metrics;
pub mod tokens;
pub mod turn;
pub mod ws;

use axum::http::HeaderMap;

/// Extract a join token: `Authorization: Bearer …` first, then the
/// `?token=` query parameter.
pub(crate) fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    let bearer = headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    bearer
        .map(ToString::to_string)
        .or_else(|| query_token.map(ToString::to_string))
}
