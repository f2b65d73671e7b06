//! Test server harness for end-to-end testing.
//!
//! Provides [`TestServer`] for spawning real signaling service instances
//! on an ephemeral port, with helpers for minting join tokens against the
//! server's configured secret.

use common::jwt::{self, JoinClaims};
use common::secret::ExposeSecret;
use signaling_service::actors::registry::RoomRegistry;
use signaling_service::config::Config;
use signaling_service::ratelimit::RateLimiter;
use signaling_service::routes::{build_routes, AppState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Join-token secret used by harness-spawned servers.
pub const TEST_JOIN_SECRET: &str = "test-join-secret";

/// Internal API secret used by harness-spawned servers.
pub const TEST_INTERNAL_SECRET: &str = "test-internal-secret";

/// Test harness for spawning the signaling service in end-to-end tests.
///
/// # Example
/// ```rust,ignore
/// let server = TestServer::spawn().await?;
/// let response = reqwest::get(format!("{}/health", server.url())).await?;
/// assert_eq!(response.status(), 200);
/// ```
pub struct TestServer {
    addr: SocketAddr,
    config: Config,
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Spawn a server with the default test configuration: dev token
    /// issuer enabled, no TURN relay configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the listener
    /// cannot bind.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(HashMap::new()).await
    }

    /// Spawn a server with configuration overrides on top of the test
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the listener
    /// cannot bind.
    pub async fn spawn_with(
        overrides: HashMap<String, String>,
    ) -> Result<Self, anyhow::Error> {
        let mut vars = HashMap::from([
            (
                "JOIN_TOKEN_SECRET".to_string(),
                TEST_JOIN_SECRET.to_string(),
            ),
            (
                "INTERNAL_API_SECRET".to_string(),
                TEST_INTERNAL_SECRET.to_string(),
            ),
            ("ALLOW_DEV_TOKEN_ISSUER".to_string(), "true".to_string()),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
        ]);
        vars.extend(overrides);

        let config = Config::from_vars(&vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {e}"))?;

        let state = Arc::new(AppState {
            config: Arc::new(config.clone()),
            rooms: Arc::new(RoomRegistry::new()),
            limiter: RateLimiter::new(4),
        });

        // No metrics recorder: it can only be installed once per process
        let app = build_routes(state, None);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {e}"))?;
        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {e}"))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {e}");
            }
        });

        Ok(Self {
            addr,
            config,
            _handle: handle,
        })
    }

    /// Base HTTP URL of the test server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket URL for a room, without query parameters.
    #[must_use]
    pub fn ws_url(&self, room_id: &str) -> String {
        format!("ws://{}/ws/{room_id}", self.addr)
    }

    /// Socket address the server is bound to.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mint a join token signed with this server's secret.
    #[must_use]
    pub fn join_token(&self, user_id: &str, room_id: &str, name: Option<&str>) -> String {
        let now = chrono::Utc::now().timestamp();
        jwt::sign(
            &JoinClaims {
                sub: user_id.to_string(),
                room: room_id.to_string(),
                name: name.map(ToString::to_string),
                iat: now,
                exp: now + 120,
                jti: None,
            },
            self.config.join_token_secret.expose_secret().as_bytes(),
        )
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
