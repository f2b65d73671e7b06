//! Signaling service entry point.
//!
//! Boots tracing, loads configuration from the environment, installs the
//! Prometheus recorder, and serves the front door until ctrl-c. Shutdown
//! cancels the room registry, which fans out to every room and socket.

use std::sync::Arc;

use signaling_service::actors::registry::RoomRegistry;
use signaling_service::config::Config;
use signaling_service::observability::metrics::init_metrics_recorder;
use signaling_service::ratelimit::{RateLimiter, DEFAULT_SHARD_COUNT};
use signaling_service::routes::{build_routes, AppState};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signaling_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting signaling service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        allow_dev_token_issuer = config.allow_dev_token_issuer,
        turn_urls = config.turn_urls.len(),
        turn_ttl_seconds = config.turn_ttl_seconds,
        turn_rate_limit_max = config.turn_rate_limit_max,
        turn_rate_limit_window_sec = config.turn_rate_limit_window_sec,
        "Configuration loaded successfully"
    );

    let metrics_handle = match init_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics recorder not installed, /metrics disabled");
            None
        }
    };

    let rooms = Arc::new(RoomRegistry::new());
    let state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        rooms: Arc::clone(&rooms),
        limiter: RateLimiter::new(DEFAULT_SHARD_COUNT),
    });

    let app = build_routes(state, metrics_handle);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(rooms))
        .await?;

    info!("signaling service stopped");
    Ok(())
}

async fn shutdown_signal(rooms: Arc<RoomRegistry>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received, draining rooms");
    rooms.shutdown();
}
