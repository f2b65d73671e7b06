//! Common utilities shared across signaling service components.

#![warn(clippy::pedantic)]

/// Join-token codec (HMAC-SHA256 over `header.payload`)
pub mod jwt;

/// Secret types that prevent accidental logging
pub mod secret;
