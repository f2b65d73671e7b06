//! HTTP routes for the signaling service.
//!
//! Defines the Axum router and application state. JSON endpoints get CORS
//! and a request timeout; the WebSocket route gets neither (the 101
//! response must pass through unwrapped and the connection is long-lived).

use axum::{
    http::{header, HeaderName, Method},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::actors::registry::RoomRegistry;
use crate::config::Config;
use crate::errors::ApiError;
use crate::handlers;
use crate::ratelimit::RateLimiter;

/// Request timeout for JSON endpoints. Never applied to the WS route.
const JSON_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Application state shared across all handlers.
pub struct AppState {
    /// Service configuration.
    pub config: Arc<Config>,

    /// Per-room actor registry.
    pub rooms: Arc<RoomRegistry>,

    /// Sharded rate limiter.
    pub limiter: RateLimiter,
}

/// Build the application routes.
///
/// - `GET /health` - liveness
/// - `POST /token/issue` - dev-only token issuer
/// - `GET /turn-credentials` - ephemeral TURN credentials (rate limited)
/// - `GET /ws/:room_id` - authenticated WebSocket attach
/// - `GET /metrics` - Prometheus render (when a recorder handle is given)
pub fn build_routes(state: Arc<AppState>, metrics_handle: Option<PrometheusHandle>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-internal-secret"),
            HeaderName::from_static("x-dev-issuer-secret"),
        ]);

    let json_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/token/issue", post(handlers::tokens::issue_token))
        .route(
            "/turn-credentials",
            get(handlers::turn::turn_credentials),
        )
        .layer(cors)
        .layer(TimeoutLayer::new(JSON_REQUEST_TIMEOUT))
        .with_state(state.clone());

    // The WebSocket 101 response is returned as-is: no CORS wrapping, no
    // timeout on the long-lived connection.
    let ws_routes = Router::new()
        .route("/ws/:room_id", get(handlers::ws::ws_handler))
        .with_state(state);

    let mut app = json_routes.merge(ws_routes);

    if let Some(handle) = metrics_handle {
        app = app.merge(
            Router::new()
                .route("/metrics", get(handlers::metrics::metrics_handler))
                .with_state(handle),
        );
    }

    app.fallback(fallback_not_found)
        .layer(TraceLayer::new_for_http())
}

async fn fallback_not_found() -> ApiError {
    ApiError::NotFound("no such route".to_string())
}
