//! TURN credential endpoint.
//!
//! Verifies the caller's join token (any room), applies the per-user rate
//! limit, and returns an ICE server list: the STUN block always, the TURN
//! block only when relay URIs and a shared secret are configured.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    Json,
};
use common::jwt;
use common::secret::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

use super::extract_token;
use crate::errors::ApiError;
use crate::observability::metrics as obs;
use crate::ratelimit::RateLimitDecision;
use crate::routes::AppState;
use crate::turn;

#[derive(Debug, Deserialize)]
pub struct TurnQuery {
    pub token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnCredentialsResponse {
    pub ice_servers: Vec<IceServer>,
    pub ttl_seconds: u64,
    pub rate_limit: RateLimitDecision,
}

/// `GET /turn-credentials?token=…` - mint ephemeral TURN credentials.
#[instrument(skip_all, name = "signal.turn.credentials")]
pub async fn turn_credentials(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<TurnQuery>,
) -> Result<Json<TurnCredentialsResponse>, ApiError> {
    let token = extract_token(&headers, query.token.as_deref())
        .ok_or_else(|| ApiError::Unauthorized("missing token".to_string()))?;

    let claims = jwt::verify(
        &token,
        state.config.join_token_secret.expose_secret().as_bytes(),
        None,
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| {
        tracing::debug!(target: "signal.turn", error = %e, "join token rejected");
        ApiError::Unauthorized("invalid or expired token".to_string())
    })?;

    let decision = state
        .limiter
        .check(
            &format!("turn:{}", claims.sub),
            state.config.turn_rate_limit_max,
            state.config.turn_rate_limit_window_sec,
        )
        .await
        .map_err(|_| ApiError::RateLimiterUnavailable)?;

    if !decision.allowed {
        return Err(ApiError::RateLimited(decision));
    }

    let mut ice_servers = vec![IceServer {
        urls: state.config.stun_urls.clone(),
        username: None,
        credential: None,
    }];

    if !state.config.turn_urls.is_empty() {
        if let Some(creds) = turn::mint(
            &claims.sub,
            state.config.turn_shared_secret.as_ref(),
            state.config.turn_ttl_seconds,
            chrono::Utc::now().timestamp(),
        ) {
            obs::record_turn_credentials_issued();
            ice_servers.push(IceServer {
                urls: state.config.turn_urls.clone(),
                username: Some(creds.username),
                credential: Some(creds.credential),
            });
        }
    }

    Ok(Json(TurnCredentialsResponse {
        ice_servers,
        ttl_seconds: state.config.turn_ttl_seconds,
        rate_limit: decision,
    }))
}
