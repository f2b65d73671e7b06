//! Wire protocol between clients and the signaling service.
//!
//! Messages are newline-free JSON objects with a string `type` discriminant.
//! Decoding is two-phase so the error taxonomy is precise: invalid JSON or a
//! missing/ill-typed field is `BAD_MESSAGE`, while well-formed JSON with an
//! unknown `type` is `UNSUPPORTED`. Signaling payloads are opaque
//! `serde_json::Value`s and are forwarded verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Liveness probe; the server echoes `ts` back in a pong.
    #[serde(rename = "heartbeat.ping")]
    HeartbeatPing { ts: f64 },

    /// Claim an alias in the room.
    #[serde(rename = "discovery.claim", rename_all = "camelCase")]
    DiscoveryClaim {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Resolve an alias to a connected peer.
    #[serde(rename = "discovery.resolve", rename_all = "camelCase")]
    DiscoveryResolve {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Relay an opaque signaling payload to another peer.
    #[serde(rename = "signal.send", rename_all = "camelCase")]
    SignalSend {
        to_peer_id: String,
        payload: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        delivery_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Confirm receipt of a relayed signaling message.
    #[serde(rename = "signal.ack", rename_all = "camelCase")]
    SignalAck {
        delivery_id: String,
        to_peer_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

/// Summary of a peer as exposed to other clients.
///
/// `name` serializes as `null` when the peer holds no alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub peer_id: String,
    pub user_id: String,
    pub room_id: String,
    pub name: Option<String>,
}

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sent once per attachment; carries the session identity and roster.
    #[serde(rename = "session.welcome", rename_all = "camelCase")]
    SessionWelcome {
        peer_id: String,
        user_id: String,
        room_id: String,
        resume_token: String,
        /// Epoch milliseconds.
        resume_expires_at: i64,
        peers: Vec<PeerSummary>,
    },

    #[serde(rename = "presence.joined")]
    PresenceJoined { peer: PeerSummary },

    #[serde(rename = "presence.left", rename_all = "camelCase")]
    PresenceLeft { peer_id: String, user_id: String },

    #[serde(rename = "discovery.claimed", rename_all = "camelCase")]
    DiscoveryClaimed {
        name: String,
        user_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    #[serde(rename = "discovery.resolved", rename_all = "camelCase")]
    DiscoveryResolved {
        name: String,
        user_id: Option<String>,
        peers: Vec<PeerSummary>,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// A relayed signaling payload.
    #[serde(rename = "signal.message", rename_all = "camelCase")]
    SignalMessage {
        delivery_id: String,
        from_peer_id: String,
        from_user_id: String,
        to_peer_id: String,
        payload: serde_json::Value,
        /// Epoch milliseconds.
        sent_at: i64,
    },

    /// Delivery acknowledgement. Sent twice per delivery: once with
    /// `by_peer_id == sender` (server admission) and once with
    /// `by_peer_id == recipient` (end-to-end confirmation).
    #[serde(rename = "signal.acked", rename_all = "camelCase")]
    SignalAcked {
        delivery_id: String,
        by_peer_id: String,
        /// Epoch milliseconds.
        at: i64,
    },

    #[serde(rename = "heartbeat.pong")]
    HeartbeatPong { ts: f64 },

    #[serde(rename = "error", rename_all = "camelCase")]
    Error {
        code: ErrorCode,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

/// In-band error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    #[serde(rename = "BAD_MESSAGE")]
    BadMessage,
    #[serde(rename = "ALIAS_INVALID")]
    AliasInvalid,
    #[serde(rename = "ALIAS_TAKEN")]
    AliasTaken,
    #[serde(rename = "TARGET_NOT_FOUND")]
    TargetNotFound,
    #[serde(rename = "UNSUPPORTED")]
    Unsupported,
    #[serde(rename = "SESSION_NOT_FOUND")]
    SessionNotFound,
    #[serde(rename = "UNBOUND_SOCKET")]
    UnboundSocket,
    #[serde(rename = "STORAGE")]
    Storage,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::BadMessage => "BAD_MESSAGE",
            ErrorCode::AliasInvalid => "ALIAS_INVALID",
            ErrorCode::AliasTaken => "ALIAS_TAKEN",
            ErrorCode::TargetNotFound => "TARGET_NOT_FOUND",
            ErrorCode::Unsupported => "UNSUPPORTED",
            ErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            ErrorCode::UnboundSocket => "UNBOUND_SOCKET",
            ErrorCode::Storage => "STORAGE",
        };
        f.write_str(s)
    }
}

/// Error type for client-message decoding.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Not valid JSON, no string `type`, or fields of the wrong shape.
    #[error("bad message: {0}")]
    BadMessage(String),

    /// Well-formed JSON whose `type` is not a known variant.
    #[error("unsupported message type: {msg_type}")]
    Unsupported {
        msg_type: String,
        request_id: Option<String>,
    },
}

const KNOWN_TYPES: &[&str] = &[
    "heartbeat.ping",
    "discovery.claim",
    "discovery.resolve",
    "signal.send",
    "signal.ack",
];

/// Decode one client message from a text frame.
///
/// # Errors
///
/// `BadMessage` for malformed input, `Unsupported` for an unknown `type`
/// (carrying the `requestId` when the client supplied one, so the error
/// reply can be correlated).
pub fn decode_client_message(text: &str) -> Result<ClientMessage, DecodeError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| DecodeError::BadMessage(e.to_string()))?;

    let Some(msg_type) = value.get("type").and_then(serde_json::Value::as_str) else {
        return Err(DecodeError::BadMessage(
            "missing string `type` field".to_string(),
        ));
    };

    if !KNOWN_TYPES.contains(&msg_type) {
        let request_id = value
            .get("requestId")
            .and_then(serde_json::Value::as_str)
            .map(ToString::to_string);
        return Err(DecodeError::Unsupported {
            msg_type: msg_type.to_string(),
            request_id,
        });
    }

    serde_json::from_value(value).map_err(|e| DecodeError::BadMessage(e.to_string()))
}

/// Encode one server message as a text frame.
///
/// # Errors
///
/// Serialization of these types only fails for pathological opaque payloads;
/// callers log and drop the frame in that case.
pub fn encode_server_message(msg: &ServerMessage) -> Result<String, serde_json::Error> {
    serde_json::to_string(msg)
}

/// Normalize and validate an alias.
///
/// Aliases are lowercased, 2-32 characters, and match
/// `[a-z0-9][a-z0-9_.-]*`. Returns `None` when the input cannot be a
/// valid alias.
#[must_use]
pub fn normalize_alias(raw: &str) -> Option<String> {
    let normalized = raw.trim().to_lowercase();
    if normalized.len() < 2 || normalized.len() > 32 {
        return None;
    }

    let mut chars = normalized.chars();
    let first = chars.next()?;
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return None;
    }
    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
    {
        return None;
    }

    Some(normalized)
}
