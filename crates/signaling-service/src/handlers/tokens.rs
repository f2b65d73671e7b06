//! Dev-only join-token issuer.
//!
//! `POST /token/issue` exists so local and staging clients can mint join
//! tokens without a real identity provider. It is doubly gated: the
//! `ALLOW_DEV_TOKEN_ISSUER` flag must be set, and the caller must present
//! either the internal API secret or the dedicated dev issuer secret.
//! Secret comparison is constant-time.

use axum::{extract::State, http::HeaderMap, Json};
use common::jwt::{self, JoinClaims};
use common::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::{MAX_DEV_TOKEN_TTL_SECONDS, MIN_DEV_TOKEN_TTL_SECONDS};
use crate::errors::ApiError;
use crate::routes::AppState;

/// Default TTL when the request does not name one.
const DEFAULT_TTL_SECONDS: u64 = 300;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenRequest {
    pub user_id: String,
    pub room_id: String,
    pub name: Option<String>,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueTokenResponse {
    pub token: String,
    pub room_id: String,
    pub user_id: String,
    pub name: Option<String>,
    /// Epoch milliseconds.
    pub expires_at: i64,
}

/// `POST /token/issue` - mint a short-lived join token (dev only).
#[instrument(skip_all, name = "signal.token.issue")]
pub async fn issue_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<IssueTokenRequest>,
) -> Result<Json<IssueTokenResponse>, ApiError> {
    if !state.config.allow_dev_token_issuer {
        return Err(ApiError::DevIssuerDisabled);
    }

    let authorized = header_secret_matches(
        &headers,
        "x-internal-secret",
        Some(&state.config.internal_api_secret),
    ) || header_secret_matches(
        &headers,
        "x-dev-issuer-secret",
        state.config.dev_issuer_secret.as_ref(),
    );
    if !authorized {
        return Err(ApiError::Forbidden);
    }

    let user_id = request.user_id.trim();
    let room_id = request.room_id.trim();
    if user_id.is_empty() || room_id.is_empty() {
        return Err(ApiError::BadRequest(
            "userId and roomId are required".to_string(),
        ));
    }

    let ttl = request
        .ttl_seconds
        .unwrap_or(DEFAULT_TTL_SECONDS)
        .clamp(MIN_DEV_TOKEN_TTL_SECONDS, MAX_DEV_TOKEN_TTL_SECONDS);

    let now = chrono::Utc::now().timestamp();
    #[allow(clippy::cast_possible_wrap)]
    let exp = now + ttl as i64;

    let claims = JoinClaims {
        sub: user_id.to_string(),
        room: room_id.to_string(),
        name: request.name.clone(),
        iat: now,
        exp,
        jti: None,
    };
    let token = jwt::sign(
        &claims,
        state.config.join_token_secret.expose_secret().as_bytes(),
    );

    info!(
        target: "signal.token",
        room_id = %room_id,
        ttl_seconds = ttl,
        "dev token issued"
    );

    Ok(Json(IssueTokenResponse {
        token,
        room_id: room_id.to_string(),
        user_id: user_id.to_string(),
        name: request.name,
        expires_at: exp * 1000,
    }))
}

fn header_secret_matches(
    headers: &HeaderMap,
    header_name: &str,
    secret: Option<&SecretString>,
) -> bool {
    let Some(secret) = secret else {
        return false;
    };
    headers
        .get(header_name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|presented| {
            ring::constant_time::verify_slices_are_equal(
                presented.as_bytes(),
                secret.expose_secret().as_bytes(),
            )
            .is_ok()
        })
}
