//! Signaling service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8787";

/// Default STUN server list (comma-separated).
pub const DEFAULT_STUN_URLS: &str = "stun:stun.l.google.com:19302";

/// Default lifetime of issued TURN credentials.
pub const DEFAULT_TURN_TTL_SECONDS: u64 = 3600;

/// Minimum lifetime of issued TURN credentials.
pub const MIN_TURN_TTL_SECONDS: u64 = 60;

/// Default per-user TURN credential budget.
pub const DEFAULT_TURN_RATE_LIMIT_MAX: u32 = 10;

/// Default TURN rate-limit window in seconds.
pub const DEFAULT_TURN_RATE_LIMIT_WINDOW_SEC: u64 = 60;

/// Minimum TTL accepted by the dev token issuer.
pub const MIN_DEV_TOKEN_TTL_SECONDS: u64 = 30;

/// Maximum TTL accepted by the dev token issuer.
pub const MAX_DEV_TOKEN_TTL_SECONDS: u64 = 600;

/// Signaling service configuration.
///
/// Loaded from environment variables with sensible defaults.
/// Sensitive fields are redacted in Debug output.
#[derive(Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:8787").
    pub bind_address: String,

    /// HMAC key for join tokens.
    pub join_token_secret: SecretString,

    /// Shared secret accepted via the `x-internal-secret` header.
    pub internal_api_secret: SecretString,

    /// Optional secret accepted by the dev issuer via `x-dev-issuer-secret`.
    pub dev_issuer_secret: Option<SecretString>,

    /// Whether `POST /token/issue` is enabled at all.
    pub allow_dev_token_issuer: bool,

    /// TURN relay URIs. Empty disables the TURN block in credential responses.
    pub turn_urls: Vec<String>,

    /// HMAC-SHA1 key for ephemeral TURN credentials.
    pub turn_shared_secret: Option<SecretString>,

    /// Lifetime of issued TURN credentials (clamped to >= 60).
    pub turn_ttl_seconds: u64,

    /// Per-user TURN credential budget.
    pub turn_rate_limit_max: u32,

    /// TURN rate-limit window in seconds.
    pub turn_rate_limit_window_sec: u64,

    /// STUN server URIs included in credential responses.
    pub stun_urls: Vec<String>,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("join_token_secret", &"[REDACTED]")
            .field("internal_api_secret", &"[REDACTED]")
            .field(
                "dev_issuer_secret",
                &self.dev_issuer_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("allow_dev_token_issuer", &self.allow_dev_token_issuer)
            .field("turn_urls", &self.turn_urls)
            .field(
                "turn_shared_secret",
                &self.turn_shared_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("turn_ttl_seconds", &self.turn_ttl_seconds)
            .field("turn_rate_limit_max", &self.turn_rate_limit_max)
            .field(
                "turn_rate_limit_window_sec",
                &self.turn_rate_limit_window_sec,
            )
            .field("stun_urls", &self.stun_urls)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn split_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a required variable is missing or a
    /// numeric variable fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a required variable is missing or a
    /// numeric variable fails to parse.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let join_token_secret = SecretString::from(
            vars.get("JOIN_TOKEN_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("JOIN_TOKEN_SECRET".to_string()))?
                .clone(),
        );

        let internal_api_secret = SecretString::from(
            vars.get("INTERNAL_API_SECRET")
                .ok_or_else(|| ConfigError::MissingEnvVar("INTERNAL_API_SECRET".to_string()))?
                .clone(),
        );

        let dev_issuer_secret = vars
            .get("DEV_ISSUER_SECRET")
            .filter(|s| !s.is_empty())
            .cloned()
            .map(SecretString::from);

        let allow_dev_token_issuer = vars
            .get("ALLOW_DEV_TOKEN_ISSUER")
            .is_some_and(|v| v == "true");

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let turn_urls = vars.get("TURN_URLS").map_or_else(Vec::new, |v| split_urls(v));

        let turn_shared_secret = vars
            .get("TURN_SHARED_SECRET")
            .filter(|s| !s.is_empty())
            .cloned()
            .map(SecretString::from);

        let turn_ttl_seconds = parse_var(vars, "TURN_TTL_SECONDS", DEFAULT_TURN_TTL_SECONDS)?
            .max(MIN_TURN_TTL_SECONDS);

        let turn_rate_limit_max =
            parse_var(vars, "TURN_RATE_LIMIT_MAX", DEFAULT_TURN_RATE_LIMIT_MAX)?;

        let turn_rate_limit_window_sec = parse_var(
            vars,
            "TURN_RATE_LIMIT_WINDOW_SEC",
            DEFAULT_TURN_RATE_LIMIT_WINDOW_SEC,
        )?;

        let stun_urls = vars
            .get("STUN_URLS")
            .map_or_else(|| split_urls(DEFAULT_STUN_URLS), |v| split_urls(v));

        Ok(Config {
            bind_address,
            join_token_secret,
            internal_api_secret,
            dev_issuer_secret,
            allow_dev_token_issuer,
            turn_urls,
            turn_shared_secret,
            turn_ttl_seconds,
            turn_rate_limit_max,
            turn_rate_limit_window_sec,
            stun_urls,
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
    }
}
