//! Mailbox messages and reply payloads for the room actor.

use super::socket::SocketHandle;
use crate::wire::ClientMessage;
use thiserror::Error;
use tokio::sync::oneshot;

/// Error returned by handle methods when the room actor is gone.
#[derive(Debug, Error)]
pub enum RoomError {
    #[error("room actor unavailable: {0}")]
    Unavailable(String),
}

/// Why a socket departed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepartCause {
    /// The transport closed (client close frame or EOF).
    TransportClosed,
    /// The transport errored, or an outbound send failed.
    TransportError,
}

/// A request to attach an authenticated socket to the room.
pub struct AttachRequest {
    /// User id from the verified join token (`sub`).
    pub user_id: String,
    /// Optional requested alias from the token claims.
    pub name: Option<String>,
    /// Optional resume token from the URL.
    pub resume_token: Option<String>,
    /// Writer handle for the new socket.
    pub socket: SocketHandle,
}

/// Result of a successful attachment.
#[derive(Debug, Clone)]
pub struct AttachedSession {
    pub peer_id: String,
    /// True when an existing peer identity was re-adopted via resume token.
    pub resumed: bool,
}

/// Snapshot of room state, used by tests and introspection.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub peers: Vec<PeerSnapshot>,
    pub pending_deliveries: usize,
    pub resume_records: usize,
}

#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub peer_id: String,
    pub user_id: String,
    pub alias: Option<String>,
    pub connected: bool,
}

impl RoomSnapshot {
    /// Find a peer snapshot by id.
    #[must_use]
    pub fn peer(&self, peer_id: &str) -> Option<&PeerSnapshot> {
        self.peers.iter().find(|p| p.peer_id == peer_id)
    }
}

/// Messages handled by the room actor.
pub enum RoomMessage {
    Attach {
        request: AttachRequest,
        respond_to: oneshot::Sender<AttachedSession>,
    },
    Frame {
        peer_id: String,
        connection_id: String,
        /// The socket the frame arrived on; replies and protocol errors go
        /// here even when it is no longer the peer's registered socket.
        socket: SocketHandle,
        msg: ClientMessage,
    },
    Depart {
        peer_id: String,
        connection_id: String,
        cause: DepartCause,
    },
    Snapshot {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
}
