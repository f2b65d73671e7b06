//! Ephemeral TURN credential minting.
//!
//! Implements the long-term-credential derivation used by coturn's
//! `use-auth-secret` mode: the username is `<expiresAt>:<userId>` and the
//! credential is `base64(HMAC-SHA1(shared_secret, username))`. The relay
//! recomputes the HMAC and honours the embedded expiry, so no state is
//! shared beyond the secret.

use base64::{engine::general_purpose::STANDARD, Engine};
use common::secret::{ExposeSecret, SecretString};
use ring::hmac;

/// An ephemeral TURN credential pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnCredentials {
    /// `<expiresAt>:<userId>` where `expiresAt` is Unix epoch seconds.
    pub username: String,
    /// base64 of HMAC-SHA1(shared_secret, username).
    pub credential: String,
    /// Lifetime the pair was minted with.
    pub ttl_seconds: u64,
}

/// Mint a TURN credential pair for a user.
///
/// Returns `None` when no shared secret is configured (TURN disabled).
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn mint(
    user_id: &str,
    shared_secret: Option<&SecretString>,
    ttl_seconds: u64,
    now_secs: i64,
) -> Option<TurnCredentials> {
    let secret = shared_secret?;

    let expires_at = now_secs + ttl_seconds as i64;
    let username = format!("{expires_at}:{user_id}");

    let key = hmac::Key::new(
        hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
        secret.expose_secret().as_bytes(),
    );
    let tag = hmac::sign(&key, username.as_bytes());
    let credential = STANDARD.encode(tag.as_ref());

    Some(TurnCredentials {
        username,
        credential,
        ttl_seconds,
    })
}
