//! Join-token codec shared by the front door and the dev issuer.
//!
//! Join tokens are compact JWTs signed with HMAC-SHA256:
//! `base64url(header).base64url(payload).base64url(HMAC-SHA256(secret, header.payload))`
//! with the fixed header `{"alg":"HS256","typ":"JWT"}`.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only HS256 is accepted; any other `alg` is rejected
//! - Signature comparison is constant-time via `ring::hmac::verify`
//! - The `sub` field in claims is redacted in Debug output

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use ring::hmac;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum allowed token size in bytes (8KB).
///
/// Join tokens are a few hundred bytes in practice; anything larger is
/// rejected before base64 decode or HMAC work is spent on it.
pub const MAX_TOKEN_SIZE_BYTES: usize = 8192;

/// Errors that can occur during join-token verification.
///
/// The variants are deliberately precise so callers can log the failure
/// kind; messages shown to clients stay generic.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Token is not a three-part JWT, or exceeds the size limit.
    #[error("malformed token")]
    Malformed,

    /// Header is not valid base64url/JSON, or `alg` is not HS256.
    #[error("bad token header")]
    BadHeader,

    /// Payload is not valid base64url/JSON, or required claims are missing.
    #[error("bad token payload")]
    BadPayload,

    /// HMAC verification failed.
    #[error("bad token signature")]
    BadSignature,

    /// The `exp` claim is at or before the verification time.
    #[error("token expired")]
    Expired,

    /// The `room` claim does not match the expected room.
    #[error("token bound to a different room")]
    RoomMismatch,
}

/// Claims carried by a join token.
///
/// `sub` is the user id, `room` binds the token to one room, `name` is an
/// optional requested alias, `iat`/`exp` are Unix epoch seconds.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinClaims {
    /// Subject (user id) - redacted in Debug output.
    pub sub: String,

    /// Room the token is valid for.
    pub room: String,

    /// Optional requested alias.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Issued-at timestamp (Unix epoch seconds).
    pub iat: i64,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Optional token id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl fmt::Debug for JoinClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinClaims")
            .field("sub", &"[REDACTED]")
            .field("room", &self.room)
            .field("name", &self.name)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .field("jti", &self.jti)
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Sign a set of claims into a compact join token.
#[must_use]
pub fn sign(claims: &JoinClaims, secret: &[u8]) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    // Serializing a struct of strings and integers cannot fail
    let payload_json = serde_json::to_vec(claims).unwrap_or_default();
    let payload = URL_SAFE_NO_PAD.encode(payload_json);

    let signing_input = format!("{header}.{payload}");
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    let tag = hmac::sign(&key, signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(tag.as_ref());

    format!("{signing_input}.{signature}")
}

/// Verify a join token and return its claims.
///
/// `expected_room`, when given, must match the `room` claim exactly.
/// `now` is the verification time in Unix epoch seconds; a token with
/// `exp <= now` is rejected.
///
/// # Errors
///
/// Returns a [`TokenError`] naming the failure kind. Signature comparison
/// happens before expiry and room checks so that an attacker cannot probe
/// claim contents with a forged signature.
pub fn verify(
    token: &str,
    secret: &[u8],
    expected_room: Option<&str>,
    now: i64,
) -> Result<JoinClaims, TokenError> {
    if token.len() > MAX_TOKEN_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_TOKEN_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(TokenError::Malformed);
    }

    let parts: Vec<&str> = token.split('.').collect();
    let [header_part, payload_part, signature_part] = parts.as_slice() else {
        return Err(TokenError::Malformed);
    };

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_part)
        .map_err(|_| TokenError::BadHeader)?;
    let header: Header =
        serde_json::from_slice(&header_bytes).map_err(|_| TokenError::BadHeader)?;
    if header.alg != "HS256" {
        tracing::debug!(target: "common.jwt", alg = %header.alg, "Token rejected: unsupported algorithm");
        return Err(TokenError::BadHeader);
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature_part)
        .map_err(|_| TokenError::BadSignature)?;

    let signing_input = format!("{header_part}.{payload_part}");
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, signing_input.as_bytes(), &signature)
        .map_err(|_| TokenError::BadSignature)?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_part)
        .map_err(|_| TokenError::BadPayload)?;
    let claims: JoinClaims =
        serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::BadPayload)?;

    if claims.sub.is_empty() || claims.room.is_empty() {
        return Err(TokenError::BadPayload);
    }

    if claims.exp <= now {
        return Err(TokenError::Expired);
    }

    if let Some(expected) = expected_room {
        if claims.room != expected {
            return Err(TokenError::RoomMismatch);
        }
    }

    Ok(claims)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-join-token-secret";
    const NOW: i64 = 1_700_000_000;

    fn test_claims() -> JoinClaims {
        JoinClaims {
            sub: "alice".to_string(),
            room: "lobby".to_string(),
            name: Some("alice".to_string()),
            iat: NOW,
            exp: NOW + 120,
            jti: None,
        }
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let claims = test_claims();
        let token = sign(&claims, SECRET);

        let verified = verify(&token, SECRET, Some("lobby"), NOW).unwrap();
        assert_eq!(verified, claims);
    }

    #[test]
    fn test_round_trip_without_optional_claims() {
        let claims = JoinClaims {
            sub: "bob".to_string(),
            room: "r1".to_string(),
            name: None,
            iat: NOW,
            exp: NOW + 60,
            jti: None,
        };
        let token = sign(&claims, SECRET);

        // Optional fields should be omitted entirely from the payload
        let payload = token.split('.').nth(1).unwrap();
        let json = URL_SAFE_NO_PAD.decode(payload).unwrap();
        let text = String::from_utf8(json).unwrap();
        assert!(!text.contains("name"));
        assert!(!text.contains("jti"));

        assert_eq!(verify(&token, SECRET, None, NOW).unwrap(), claims);
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let token = sign(&test_claims(), SECRET);
        let result = verify(&token, b"other-secret", Some("lobby"), NOW);
        assert_eq!(result, Err(TokenError::BadSignature));
    }

    #[test]
    fn test_verify_rejects_tampered_payload() {
        let token = sign(&test_claims(), SECRET);
        let mut parts: Vec<&str> = token.split('.').collect();

        let forged = JoinClaims {
            sub: "mallory".to_string(),
            ..test_claims()
        };
        let forged_payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap());
        parts[1] = &forged_payload;
        let tampered = parts.join(".");

        assert_eq!(
            verify(&tampered, SECRET, Some("lobby"), NOW),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_verify_rejects_wrong_part_count() {
        assert_eq!(
            verify("not-a-jwt", SECRET, None, NOW),
            Err(TokenError::Malformed)
        );
        assert_eq!(
            verify("a.b.c.d", SECRET, None, NOW),
            Err(TokenError::Malformed)
        );
        assert_eq!(verify("", SECRET, None, NOW), Err(TokenError::Malformed));
    }

    #[test]
    fn test_verify_rejects_oversized_token() {
        let oversized = "a".repeat(MAX_TOKEN_SIZE_BYTES + 1);
        assert_eq!(
            verify(&oversized, SECRET, None, NOW),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn test_verify_rejects_non_hs256_alg() {
        // Re-sign with a header claiming a different algorithm
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
        let payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&test_claims()).unwrap());
        let signing_input = format!("{header}.{payload}");
        let key = hmac::Key::new(hmac::HMAC_SHA256, SECRET);
        let tag = hmac::sign(&key, signing_input.as_bytes());
        let token = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(tag.as_ref()));

        assert_eq!(
            verify(&token, SECRET, None, NOW),
            Err(TokenError::BadHeader)
        );
    }

    #[test]
    fn test_verify_rejects_bad_header_base64() {
        let token = sign(&test_claims(), SECRET);
        let parts: Vec<&str> = token.split('.').collect();
        let bad = format!("!!!.{}.{}", parts[1], parts[2]);
        assert_eq!(verify(&bad, SECRET, None, NOW), Err(TokenError::BadHeader));
    }

    #[test]
    fn test_verify_rejects_missing_required_claims() {
        // Payload without `sub`/`room`/`exp`, correctly signed
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(r#"{"iat":1700000000}"#);
        let signing_input = format!("{header}.{payload}");
        let key = hmac::Key::new(hmac::HMAC_SHA256, SECRET);
        let tag = hmac::sign(&key, signing_input.as_bytes());
        let token = format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(tag.as_ref()));

        assert_eq!(
            verify(&token, SECRET, None, NOW),
            Err(TokenError::BadPayload)
        );
    }

    #[test]
    fn test_verify_rejects_empty_sub() {
        let claims = JoinClaims {
            sub: String::new(),
            ..test_claims()
        };
        let token = sign(&claims, SECRET);
        assert_eq!(
            verify(&token, SECRET, None, NOW),
            Err(TokenError::BadPayload)
        );
    }

    #[test]
    fn test_verify_expiry_boundary() {
        let claims = test_claims();
        let token = sign(&claims, SECRET);

        // exp > now: accepted
        assert!(verify(&token, SECRET, None, claims.exp - 1).is_ok());
        // exp == now: rejected
        assert_eq!(
            verify(&token, SECRET, None, claims.exp),
            Err(TokenError::Expired)
        );
        // exp < now: rejected
        assert_eq!(
            verify(&token, SECRET, None, claims.exp + 1),
            Err(TokenError::Expired)
        );
    }

    #[test]
    fn test_verify_room_binding() {
        let token = sign(&test_claims(), SECRET);

        assert!(verify(&token, SECRET, Some("lobby"), NOW).is_ok());
        assert_eq!(
            verify(&token, SECRET, Some("other-room"), NOW),
            Err(TokenError::RoomMismatch)
        );
        // No expected room skips the binding check
        assert!(verify(&token, SECRET, None, NOW).is_ok());
    }

    #[test]
    fn test_signature_checked_before_expiry() {
        // An expired token with a bad signature must fail on the signature,
        // not reveal that the claims parsed
        let claims = JoinClaims {
            exp: NOW - 10,
            ..test_claims()
        };
        let token = sign(&claims, SECRET);
        assert_eq!(
            verify(&token, b"wrong", None, NOW),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_debug_redacts_sub() {
        let claims = JoinClaims {
            sub: "secret-user-id".to_string(),
            ..test_claims()
        };
        let debug_str = format!("{claims:?}");

        assert!(!debug_str.contains("secret-user-id"));
        assert!(debug_str.contains("[REDACTED]"));
    }
}
