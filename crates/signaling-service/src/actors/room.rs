//! `RoomActor` - per-room actor that owns all room state.
//!
//! Each `RoomActor`:
//! - Owns the peer table, alias registry, and socket handles for one room
//! - Owns the room's durable stores (pending deliveries, resume records)
//! - Serializes every read and write through its mailbox (single writer)
//! - Drives retries and garbage collection from one coalesced timer
//!
//! # Disconnect handling
//!
//! When a socket departs, the peer stays visible as a detached identity for
//! `RESUME_TTL`. A reconnect carrying the peer's current resume token within
//! that window re-adopts the same `peer_id` (and alias); otherwise the next
//! maintenance tick removes the peer and releases its alias.
//!
//! # Timer coalescing
//!
//! Instead of one timer per pending item the actor keeps a single "next
//! wake" deadline: every state mutation arms it to the minimum interesting
//! instant, and `tick` recomputes it from surviving records. Running `tick`
//! twice with no intervening event is a no-op.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::messages::{
    AttachRequest, AttachedSession, DepartCause, PeerSnapshot, RoomError, RoomMessage,
    RoomSnapshot,
};
use super::socket::{SocketHandle, CLOSE_NORMAL, CLOSE_SUPERSEDED};
use crate::observability::metrics as obs;
use crate::storage::{PendingDelivery, ResumeRecord, RoomStore};
use crate::wire::{self, ClientMessage, ErrorCode, PeerSummary, ServerMessage};

/// How long a detached peer stays resumable.
pub const RESUME_TTL: Duration = Duration::from_secs(30);

/// Interval between redelivery attempts of a pending delivery.
pub const RETRY_INTERVAL: Duration = Duration::from_millis(1500);

/// Maximum delivery attempts before a pending delivery is dropped.
pub const MAX_ATTEMPTS: u32 = 12;

/// Maximum age of a pending delivery.
pub const MAX_DELIVERY_AGE: Duration = Duration::from_secs(90);

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Clone)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: String,
}

impl RoomHandle {
    /// Get the room ID.
    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Attach an authenticated socket to the room.
    ///
    /// # Errors
    ///
    /// `RoomError::Unavailable` when the actor is gone.
    pub async fn attach(&self, request: AttachRequest) -> Result<AttachedSession, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Attach {
                request,
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Unavailable(format!("mailbox send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Unavailable(format!("reply dropped: {e}")))
    }

    /// Forward one decoded client message.
    ///
    /// # Errors
    ///
    /// `RoomError::Unavailable` when the actor is gone.
    pub async fn frame(
        &self,
        peer_id: String,
        connection_id: String,
        socket: SocketHandle,
        msg: ClientMessage,
    ) -> Result<(), RoomError> {
        self.sender
            .send(RoomMessage::Frame {
                peer_id,
                connection_id,
                socket,
                msg,
            })
            .await
            .map_err(|e| RoomError::Unavailable(format!("mailbox send failed: {e}")))
    }

    /// Notify the room that a socket closed or errored.
    ///
    /// # Errors
    ///
    /// `RoomError::Unavailable` when the actor is gone.
    pub async fn depart(
        &self,
        peer_id: String,
        connection_id: String,
        cause: DepartCause,
    ) -> Result<(), RoomError> {
        self.sender
            .send(RoomMessage::Depart {
                peer_id,
                connection_id,
                cause,
            })
            .await
            .map_err(|e| RoomError::Unavailable(format!("mailbox send failed: {e}")))
    }

    /// Get a snapshot of room state.
    ///
    /// # Errors
    ///
    /// `RoomError::Unavailable` when the actor is gone.
    pub async fn snapshot(&self) -> Result<RoomSnapshot, RoomError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RoomMessage::Snapshot { respond_to: tx })
            .await
            .map_err(|e| RoomError::Unavailable(format!("mailbox send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Unavailable(format!("reply dropped: {e}")))
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for socket actors.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// A participant presence within the room.
struct Peer {
    peer_id: String,
    user_id: String,
    alias: Option<String>,
    /// Bearer capability for re-adopting this identity. Rotated on every
    /// (re)attach.
    resume_token: String,
    resume_deadline: Instant,
    resume_expires_at_ms: i64,
    connected: bool,
    #[allow(dead_code)] // Read by snapshot/introspection paths only
    last_seen: Instant,
    socket: Option<SocketHandle>,
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: String,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    store: Arc<dyn RoomStore>,
    peers: HashMap<String, Peer>,
    /// Normalized alias -> peer id.
    aliases: HashMap<String, String>,
    /// Coalesced deadline for the next maintenance pass.
    next_wake: Option<Instant>,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: String,
        store: Arc<dyn RoomStore>,
        cancel_token: CancellationToken,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id: room_id.clone(),
            receiver,
            cancel_token: cancel_token.clone(),
            store,
            peers: HashMap::new(),
            aliases: HashMap::new(),
            next_wake: None,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "signal.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "signal.actor.room",
            room_id = %self.room_id,
            "room actor started"
        );

        loop {
            let wake = self.next_wake;
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.graceful_shutdown();
                    break;
                }

                () = Self::sleep_until_wake(wake) => {
                    self.next_wake = None;
                    self.tick(Instant::now()).await;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => self.handle_message(message).await,
                        None => {
                            info!(
                                target: "signal.actor.room",
                                room_id = %self.room_id,
                                "room mailbox closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "signal.actor.room",
            room_id = %self.room_id,
            peers = self.peers.len(),
            "room actor stopped"
        );
    }

    async fn sleep_until_wake(wake: Option<Instant>) {
        match wake {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }

    /// Handle a single mailbox message.
    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Attach {
                request,
                respond_to,
            } => {
                let session = self.handle_attach(request).await;
                let _ = respond_to.send(session);
            }

            RoomMessage::Frame {
                peer_id,
                connection_id,
                socket,
                msg,
            } => {
                self.handle_frame(&peer_id, &connection_id, &socket, msg)
                    .await;
            }

            RoomMessage::Depart {
                peer_id,
                connection_id,
                cause,
            } => {
                debug!(
                    target: "signal.actor.room",
                    room_id = %self.room_id,
                    peer_id = %peer_id,
                    cause = ?cause,
                    "socket departed"
                );
                let failures = self.apply_depart(&peer_id, &connection_id).await;
                self.process_transport_failures(failures).await;
            }

            RoomMessage::Snapshot { respond_to } => {
                let snapshot = self.snapshot().await;
                let _ = respond_to.send(snapshot);
            }
        }
    }

    // ------------------------------------------------------------------
    // Attach
    // ------------------------------------------------------------------

    #[instrument(skip_all, fields(room_id = %self.room_id))]
    async fn handle_attach(&mut self, request: AttachRequest) -> AttachedSession {
        let now = Instant::now();
        let AttachRequest {
            user_id,
            name,
            resume_token,
            socket,
        } = request;

        let resumed_peer_id = self.try_resume(resume_token.as_deref(), &user_id).await;
        let resumed = resumed_peer_id.is_some();

        let mut was_connected = false;
        let mut prior_token: Option<String> = None;

        let peer_id = match resumed_peer_id {
            Some(peer_id) => {
                // Re-adopt: same peer id, same alias. A still-open previous
                // socket is superseded, never raced.
                if let Some(peer) = self.peers.get_mut(&peer_id) {
                    was_connected = peer.connected;
                    prior_token = Some(peer.resume_token.clone());
                    if let Some(old_socket) = peer.socket.take() {
                        old_socket.close(CLOSE_SUPERSEDED, "superseded by a new session");
                    }
                }
                peer_id
            }
            None => {
                let peer_id = Uuid::new_v4().to_string();
                self.peers.insert(
                    peer_id.clone(),
                    Peer {
                        peer_id: peer_id.clone(),
                        user_id: user_id.clone(),
                        alias: None,
                        resume_token: String::new(),
                        resume_deadline: now,
                        resume_expires_at_ms: 0,
                        connected: false,
                        last_seen: now,
                        socket: None,
                    },
                );
                peer_id
            }
        };

        // Rotate the resume token; the record rotates with it.
        if let Some(prior) = prior_token {
            if let Err(e) = self.store.delete_resume(&prior).await {
                warn!(
                    target: "signal.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "failed to drop rotated resume record"
                );
            }
        }

        let new_token = Self::mint_resume_token();
        let resume_deadline = now + RESUME_TTL;
        #[allow(clippy::cast_possible_wrap)]
        let resume_expires_at_ms = Self::now_ms() + RESUME_TTL.as_millis() as i64;

        let record;
        {
            let Some(peer) = self.peers.get_mut(&peer_id) else {
                // Unreachable: inserted or validated above
                return AttachedSession { peer_id, resumed };
            };
            peer.resume_token = new_token.clone();
            peer.resume_deadline = resume_deadline;
            peer.resume_expires_at_ms = resume_expires_at_ms;
            peer.connected = true;
            peer.last_seen = now;
            peer.socket = Some(socket.clone());

            record = ResumeRecord {
                token: new_token.clone(),
                peer_id: peer.peer_id.clone(),
                user_id: peer.user_id.clone(),
                room_id: self.room_id.clone(),
                alias: peer.alias.clone(),
                expires_at: resume_deadline,
            };
        }

        // Written at attach so a resume racing a half-closed socket can
        // still match; depart rewrites it with a fresh deadline.
        if let Err(e) = self.store.put_resume(&record).await {
            warn!(
                target: "signal.actor.room",
                room_id = %self.room_id,
                error = %e,
                "failed to persist resume record at attach"
            );
        }
        self.arm(resume_deadline);

        // Alias from token claims is advisory: a conflict is reported
        // in-band after the welcome and the session is kept.
        let mut inline_error: Option<ServerMessage> = None;
        if let Some(raw) = name {
            match wire::normalize_alias(&raw) {
                None => {
                    inline_error = Some(ServerMessage::Error {
                        code: ErrorCode::AliasInvalid,
                        message: format!("invalid alias: {raw}"),
                        request_id: None,
                    });
                }
                Some(alias) => {
                    if let Err(code) = self.claim_alias(&peer_id, &alias) {
                        inline_error = Some(ServerMessage::Error {
                            code,
                            message: format!("alias already claimed: {alias}"),
                            request_id: None,
                        });
                    }
                }
            }
        }

        let mut failures = Vec::new();

        let roster: Vec<PeerSummary> = self
            .peers
            .values()
            .filter(|p| p.connected && p.peer_id != peer_id)
            .map(|p| self.summary(p))
            .collect();

        let (welcome, joined_summary, user_id_log) = {
            // Borrow ends before broadcasting
            let Some(peer) = self.peers.get(&peer_id) else {
                return AttachedSession { peer_id, resumed };
            };
            (
                ServerMessage::SessionWelcome {
                    peer_id: peer.peer_id.clone(),
                    user_id: peer.user_id.clone(),
                    room_id: self.room_id.clone(),
                    resume_token: new_token,
                    resume_expires_at: resume_expires_at_ms,
                    peers: roster,
                },
                self.summary(peer),
                peer.user_id.clone(),
            )
        };

        if socket.send(welcome).is_err() {
            failures.push((peer_id.clone(), socket.connection_id().to_string()));
        } else if let Some(error) = inline_error {
            let _ = socket.send(error);
        }

        // A resume of a still-connected peer is invisible to the rest of
        // the room; everything else announces itself.
        if !(resumed && was_connected) {
            failures.extend(Self::broadcast_except(
                &self.peers,
                &peer_id,
                &ServerMessage::PresenceJoined {
                    peer: joined_summary,
                },
            ));
        }

        failures.extend(self.replay_pending(&peer_id).await);

        obs::record_peer_attached(resumed);
        info!(
            target: "signal.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            user_id = %user_id_log,
            resumed,
            peers = self.peers.len(),
            "peer attached"
        );

        self.process_transport_failures(failures).await;

        AttachedSession { peer_id, resumed }
    }

    /// Match a resume token against the ledger; consumes the record when it
    /// matches this user and room and the peer still exists.
    async fn try_resume(&mut self, token: Option<&str>, user_id: &str) -> Option<String> {
        let token = token?;

        let record = match self.store.get_resume(token).await {
            Ok(found) => found?,
            Err(e) => {
                warn!(
                    target: "signal.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "resume lookup failed, treating as fresh join"
                );
                return None;
            }
        };

        if record.user_id != user_id || record.room_id != self.room_id {
            debug!(
                target: "signal.actor.room",
                room_id = %self.room_id,
                "resume token identity mismatch"
            );
            return None;
        }

        if record.expires_at <= Instant::now() || !self.peers.contains_key(&record.peer_id) {
            let _ = self.store.delete_resume(token).await;
            return None;
        }

        if let Err(e) = self.store.delete_resume(token).await {
            warn!(
                target: "signal.actor.room",
                room_id = %self.room_id,
                error = %e,
                "failed to consume resume record"
            );
        }
        Some(record.peer_id)
    }

    /// Replay undelivered, unexpired deliveries addressed to a peer.
    async fn replay_pending(&mut self, peer_id: &str) -> Vec<(String, String)> {
        let now = Instant::now();
        let mut failures = Vec::new();

        let pending = match self.store.deliveries_for(peer_id).await {
            Ok(list) => list,
            Err(e) => {
                warn!(
                    target: "signal.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "failed to list deliveries for replay"
                );
                return failures;
            }
        };

        for mut delivery in pending {
            if delivery.expires_at <= now || delivery.attempts >= MAX_ATTEMPTS {
                // Left for tick to clean up
                continue;
            }

            if self.deliver_to(peer_id, &delivery, &mut failures) {
                delivery.attempts += 1;
                delivery.next_retry_at = now + RETRY_INTERVAL;
                if let Err(e) = self.store.put_delivery(&delivery).await {
                    warn!(
                        target: "signal.actor.room",
                        room_id = %self.room_id,
                        error = %e,
                        "failed to persist replayed delivery"
                    );
                }
                self.arm(delivery.next_retry_at.min(delivery.expires_at));
                obs::record_delivery_attempt("replay");
            }
        }

        failures
    }

    // ------------------------------------------------------------------
    // Client messages
    // ------------------------------------------------------------------

    async fn handle_frame(
        &mut self,
        peer_id: &str,
        connection_id: &str,
        socket: &SocketHandle,
        msg: ClientMessage,
    ) {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            let _ = socket.send(ServerMessage::Error {
                code: ErrorCode::SessionNotFound,
                message: "session no longer exists".to_string(),
                request_id: None,
            });
            return;
        };

        let current_connection = peer.socket.as_ref().map(|s| s.connection_id().to_string());
        if current_connection.as_deref() != Some(connection_id) {
            // Frame from a socket that has been superseded or unmapped
            let _ = socket.send(ServerMessage::Error {
                code: ErrorCode::UnboundSocket,
                message: "socket is no longer bound to this session".to_string(),
                request_id: None,
            });
            return;
        }

        peer.last_seen = Instant::now();

        match msg {
            ClientMessage::HeartbeatPing { ts } => {
                let _ = socket.send(ServerMessage::HeartbeatPong { ts });
            }

            ClientMessage::DiscoveryClaim { name, request_id } => {
                self.handle_claim(peer_id, socket, &name, request_id).await;
            }

            ClientMessage::DiscoveryResolve { name, request_id } => {
                self.handle_resolve(socket, &name, request_id);
            }

            ClientMessage::SignalSend {
                to_peer_id,
                payload,
                delivery_id,
                request_id,
            } => {
                self.handle_signal_send(peer_id, socket, to_peer_id, payload, delivery_id, request_id)
                    .await;
            }

            ClientMessage::SignalAck {
                delivery_id,
                to_peer_id: _,
                request_id: _,
            } => {
                self.handle_signal_ack(peer_id, &delivery_id).await;
            }
        }
    }

    async fn handle_claim(
        &mut self,
        peer_id: &str,
        socket: &SocketHandle,
        raw_name: &str,
        request_id: Option<String>,
    ) {
        let Some(alias) = wire::normalize_alias(raw_name) else {
            let _ = socket.send(ServerMessage::Error {
                code: ErrorCode::AliasInvalid,
                message: format!("invalid alias: {raw_name}"),
                request_id,
            });
            return;
        };

        match self.claim_alias(peer_id, &alias) {
            Ok(()) => {
                let user_id = self
                    .peers
                    .get(peer_id)
                    .map(|p| p.user_id.clone())
                    .unwrap_or_default();
                let _ = socket.send(ServerMessage::DiscoveryClaimed {
                    name: alias,
                    user_id,
                    request_id,
                });

                let summary = self.peers.get(peer_id).map(|p| self.summary(p));
                if let Some(peer) = summary {
                    let failures = Self::broadcast_except(
                        &self.peers,
                        peer_id,
                        &ServerMessage::PresenceJoined { peer },
                    );
                    self.process_transport_failures(failures).await;
                }
            }
            Err(code) => {
                let _ = socket.send(ServerMessage::Error {
                    code,
                    message: format!("alias already claimed: {alias}"),
                    request_id,
                });
            }
        }
    }

    fn handle_resolve(&self, socket: &SocketHandle, raw_name: &str, request_id: Option<String>) {
        let normalized = wire::normalize_alias(raw_name);

        let mut user_id = None;
        let mut peers = Vec::new();
        if let Some(alias) = &normalized {
            if let Some(holder) = self
                .aliases
                .get(alias)
                .and_then(|peer_id| self.peers.get(peer_id))
            {
                // Only connected holders resolve
                if holder.connected {
                    user_id = Some(holder.user_id.clone());
                    peers.push(self.summary(holder));
                }
            }
        }

        let _ = socket.send(ServerMessage::DiscoveryResolved {
            name: normalized.unwrap_or_else(|| raw_name.to_string()),
            user_id,
            peers,
            request_id,
        });
    }

    async fn handle_signal_send(
        &mut self,
        sender_id: &str,
        socket: &SocketHandle,
        to_peer_id: String,
        payload: serde_json::Value,
        delivery_id: Option<String>,
        request_id: Option<String>,
    ) {
        if !self.peers.contains_key(&to_peer_id) {
            let _ = socket.send(ServerMessage::Error {
                code: ErrorCode::TargetNotFound,
                message: format!("no such peer: {to_peer_id}"),
                request_id,
            });
            return;
        }

        let now = Instant::now();
        let sent_at = Self::now_ms();
        let from_user_id = self
            .peers
            .get(sender_id)
            .map(|p| p.user_id.clone())
            .unwrap_or_default();

        let mut delivery = PendingDelivery {
            delivery_id: delivery_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            from_peer_id: sender_id.to_string(),
            from_user_id,
            to_peer_id: to_peer_id.clone(),
            payload,
            sent_at,
            attempts: 0,
            next_retry_at: now + RETRY_INTERVAL,
            expires_at: now + MAX_DELIVERY_AGE,
        };

        // A delivery that cannot be persisted is not admitted.
        if let Err(e) = self.store.put_delivery(&delivery).await {
            warn!(
                target: "signal.actor.room",
                room_id = %self.room_id,
                error = %e,
                "failed to persist delivery, refusing admission"
            );
            let _ = socket.send(ServerMessage::Error {
                code: ErrorCode::Storage,
                message: "delivery could not be persisted".to_string(),
                request_id,
            });
            return;
        }

        obs::record_delivery_admitted();

        let mut failures = Vec::new();
        if self.deliver_to(&to_peer_id, &delivery, &mut failures) {
            delivery.attempts = 1;
            if let Err(e) = self.store.put_delivery(&delivery).await {
                warn!(
                    target: "signal.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "failed to persist delivery attempt count"
                );
            }
            obs::record_delivery_attempt("immediate");
        }

        self.arm(delivery.next_retry_at.min(delivery.expires_at));

        // Admission ack to the sender; the recipient's ack follows later
        // with by_peer_id == recipient.
        if socket
            .send(ServerMessage::SignalAcked {
                delivery_id: delivery.delivery_id.clone(),
                by_peer_id: sender_id.to_string(),
                at: sent_at,
            })
            .is_err()
        {
            failures.push((sender_id.to_string(), socket.connection_id().to_string()));
        }

        self.process_transport_failures(failures).await;
    }

    async fn handle_signal_ack(&mut self, acking_peer_id: &str, delivery_id: &str) {
        let delivery = match self.store.get_delivery(acking_peer_id, delivery_id).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                // Duplicate or unknown ack: benign, at most one confirmation
                // reaches the sender
                return;
            }
            Err(e) => {
                warn!(
                    target: "signal.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "failed to look up delivery for ack"
                );
                return;
            }
        };

        if let Err(e) = self
            .store
            .delete_delivery(acking_peer_id, delivery_id)
            .await
        {
            warn!(
                target: "signal.actor.room",
                room_id = %self.room_id,
                error = %e,
                "failed to delete confirmed delivery"
            );
        }
        obs::record_delivery_confirmed();

        let mut failures = Vec::new();
        if let Some(sender) = self.peers.get(&delivery.from_peer_id) {
            if sender.connected {
                if let Some(sender_socket) = &sender.socket {
                    if sender_socket
                        .send(ServerMessage::SignalAcked {
                            delivery_id: delivery_id.to_string(),
                            by_peer_id: acking_peer_id.to_string(),
                            at: Self::now_ms(),
                        })
                        .is_err()
                    {
                        failures.push((
                            sender.peer_id.clone(),
                            sender_socket.connection_id().to_string(),
                        ));
                    }
                }
            }
        }

        self.process_transport_failures(failures).await;
    }

    // ------------------------------------------------------------------
    // Departure
    // ------------------------------------------------------------------

    /// Unmap a departed socket. Returns broadcast failures for the caller
    /// to cascade.
    async fn apply_depart(&mut self, peer_id: &str, connection_id: &str) -> Vec<(String, String)> {
        let Some(peer) = self.peers.get_mut(peer_id) else {
            return Vec::new();
        };

        // A depart for a socket that has already been superseded must not
        // disconnect the replacement.
        let matches = peer
            .socket
            .as_ref()
            .is_some_and(|s| s.connection_id() == connection_id);
        if !matches {
            return Vec::new();
        }

        peer.socket = None;
        if !peer.connected {
            return Vec::new();
        }

        let now = Instant::now();
        peer.connected = false;
        peer.last_seen = now;
        peer.resume_deadline = now + RESUME_TTL;
        #[allow(clippy::cast_possible_wrap)]
        {
            peer.resume_expires_at_ms = Self::now_ms() + RESUME_TTL.as_millis() as i64;
        }

        let record = ResumeRecord {
            token: peer.resume_token.clone(),
            peer_id: peer.peer_id.clone(),
            user_id: peer.user_id.clone(),
            room_id: self.room_id.clone(),
            alias: peer.alias.clone(),
            expires_at: peer.resume_deadline,
        };
        let user_id = peer.user_id.clone();
        let deadline = peer.resume_deadline;

        if let Err(e) = self.store.put_resume(&record).await {
            warn!(
                target: "signal.actor.room",
                room_id = %self.room_id,
                error = %e,
                "failed to persist resume record at depart"
            );
        }
        self.arm(deadline);
        obs::record_peer_detached();

        info!(
            target: "signal.actor.room",
            room_id = %self.room_id,
            peer_id = %peer_id,
            "peer detached, resume window open"
        );

        // The alias stays reserved until the peer is garbage collected.
        Self::broadcast_except(
            &self.peers,
            peer_id,
            &ServerMessage::PresenceLeft {
                peer_id: peer_id.to_string(),
                user_id,
            },
        )
    }

    async fn process_transport_failures(&mut self, mut failures: Vec<(String, String)>) {
        while let Some((peer_id, connection_id)) = failures.pop() {
            debug!(
                target: "signal.actor.room",
                room_id = %self.room_id,
                peer_id = %peer_id,
                "outbound send failed, treating socket as departed"
            );
            let more = self.apply_depart(&peer_id, &connection_id).await;
            failures.extend(more);
        }
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// One maintenance pass: retry or expire pending deliveries, expire
    /// resume records, garbage-collect detached peers, re-arm the timer.
    /// Idempotent: a second pass with no intervening event changes nothing.
    async fn tick(&mut self, now: Instant) {
        debug!(
            target: "signal.actor.room",
            room_id = %self.room_id,
            "maintenance tick"
        );

        let mut failures = Vec::new();

        match self.store.all_deliveries().await {
            Ok(deliveries) => {
                for mut delivery in deliveries {
                    if delivery.expires_at <= now {
                        self.delete_delivery_logged(&delivery).await;
                        obs::record_delivery_dropped("expired");
                        continue;
                    }

                    if delivery.next_retry_at <= now {
                        if delivery.attempts >= MAX_ATTEMPTS {
                            self.delete_delivery_logged(&delivery).await;
                            obs::record_delivery_dropped("attempts_exhausted");
                            continue;
                        }

                        if self.deliver_to(&delivery.to_peer_id, &delivery, &mut failures) {
                            delivery.attempts += 1;
                            obs::record_delivery_attempt("retry");
                        }
                        delivery.next_retry_at = now + RETRY_INTERVAL;
                        if let Err(e) = self.store.put_delivery(&delivery).await {
                            warn!(
                                target: "signal.actor.room",
                                room_id = %self.room_id,
                                error = %e,
                                "failed to persist retried delivery"
                            );
                        }
                    }

                    self.arm(delivery.next_retry_at.min(delivery.expires_at));
                }
            }
            Err(e) => {
                warn!(
                    target: "signal.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "failed to walk deliveries, retrying next tick"
                );
                self.arm(now + RETRY_INTERVAL);
            }
        }

        match self.store.all_resume().await {
            Ok(records) => {
                for record in records {
                    if record.expires_at > now {
                        self.arm(record.expires_at);
                        continue;
                    }

                    if let Err(e) = self.store.delete_resume(&record.token).await {
                        warn!(
                            target: "signal.actor.room",
                            room_id = %self.room_id,
                            error = %e,
                            "failed to delete expired resume record"
                        );
                    }

                    let collectable = self
                        .peers
                        .get(&record.peer_id)
                        .is_some_and(|p| !p.connected && p.resume_token == record.token);
                    if collectable {
                        if let Some(peer) = self.peers.remove(&record.peer_id) {
                            if let Some(alias) = &peer.alias {
                                if self.aliases.get(alias) == Some(&record.peer_id) {
                                    self.aliases.remove(alias);
                                }
                            }
                            obs::record_peer_collected();
                            info!(
                                target: "signal.actor.room",
                                room_id = %self.room_id,
                                peer_id = %record.peer_id,
                                "resume window elapsed, peer removed"
                            );
                        }
                    }
                }
            }
            Err(e) => {
                warn!(
                    target: "signal.actor.room",
                    room_id = %self.room_id,
                    error = %e,
                    "failed to walk resume records, retrying next tick"
                );
                self.arm(now + RETRY_INTERVAL);
            }
        }

        self.process_transport_failures(failures).await;
    }

    async fn delete_delivery_logged(&self, delivery: &PendingDelivery) {
        if let Err(e) = self
            .store
            .delete_delivery(&delivery.to_peer_id, &delivery.delivery_id)
            .await
        {
            warn!(
                target: "signal.actor.room",
                room_id = %self.room_id,
                error = %e,
                "failed to delete finished delivery"
            );
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Write a delivery frame toward a recipient, if connected. Returns
    /// true only when the frame was actually enqueued.
    fn deliver_to(
        &self,
        to_peer_id: &str,
        delivery: &PendingDelivery,
        failures: &mut Vec<(String, String)>,
    ) -> bool {
        let Some(target) = self.peers.get(to_peer_id) else {
            return false;
        };
        if !target.connected {
            return false;
        }
        let Some(socket) = &target.socket else {
            return false;
        };

        let frame = ServerMessage::SignalMessage {
            delivery_id: delivery.delivery_id.clone(),
            from_peer_id: delivery.from_peer_id.clone(),
            from_user_id: delivery.from_user_id.clone(),
            to_peer_id: delivery.to_peer_id.clone(),
            payload: delivery.payload.clone(),
            sent_at: delivery.sent_at,
        };

        if socket.send(frame).is_err() {
            failures.push((target.peer_id.clone(), socket.connection_id().to_string()));
            return false;
        }
        true
    }

    /// Claim an alias for a peer. Claiming one's own alias is a no-op
    /// success; a peer claiming a new alias releases its previous one.
    fn claim_alias(&mut self, peer_id: &str, alias: &str) -> Result<(), ErrorCode> {
        match self.aliases.get(alias) {
            Some(holder) if holder == peer_id => Ok(()),
            Some(_) => Err(ErrorCode::AliasTaken),
            None => {
                let previous = self
                    .peers
                    .get_mut(peer_id)
                    .and_then(|p| p.alias.replace(alias.to_string()));
                if let Some(previous) = previous {
                    self.aliases.remove(&previous);
                }
                self.aliases.insert(alias.to_string(), peer_id.to_string());
                Ok(())
            }
        }
    }

    fn summary(&self, peer: &Peer) -> PeerSummary {
        PeerSummary {
            peer_id: peer.peer_id.clone(),
            user_id: peer.user_id.clone(),
            room_id: self.room_id.clone(),
            name: peer.alias.clone(),
        }
    }

    /// Send to every connected peer except one. Returns the sockets that
    /// refused the frame.
    fn broadcast_except(
        peers: &HashMap<String, Peer>,
        except_peer_id: &str,
        msg: &ServerMessage,
    ) -> Vec<(String, String)> {
        let mut failures = Vec::new();
        for peer in peers.values() {
            if peer.peer_id == except_peer_id || !peer.connected {
                continue;
            }
            if let Some(socket) = &peer.socket {
                if socket.send(msg.clone()).is_err() {
                    failures.push((peer.peer_id.clone(), socket.connection_id().to_string()));
                }
            }
        }
        failures
    }

    /// Re-arm the coalesced timer to no later than `at`.
    fn arm(&mut self, at: Instant) {
        self.next_wake = Some(match self.next_wake {
            Some(current) => current.min(at),
            None => at,
        });
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Mint an unpredictable resume token (32 random bytes, hex-encoded).
    #[allow(clippy::expect_used)] // CSPRNG fill on 32 bytes is an unreachable failure condition
    fn mint_resume_token() -> String {
        let rng = ring::rand::SystemRandom::new();
        let mut bytes = [0u8; 32];
        ring::rand::SecureRandom::fill(&rng, &mut bytes)
            .expect("CSPRNG should not fail on 32 bytes");
        hex::encode(bytes)
    }

    async fn snapshot(&self) -> RoomSnapshot {
        let pending_deliveries = self
            .store
            .all_deliveries()
            .await
            .map(|d| d.len())
            .unwrap_or_default();
        let resume_records = self
            .store
            .all_resume()
            .await
            .map(|r| r.len())
            .unwrap_or_default();

        RoomSnapshot {
            room_id: self.room_id.clone(),
            peers: self
                .peers
                .values()
                .map(|p| PeerSnapshot {
                    peer_id: p.peer_id.clone(),
                    user_id: p.user_id.clone(),
                    alias: p.alias.clone(),
                    connected: p.connected,
                })
                .collect(),
            pending_deliveries,
            resume_records,
        }
    }

    fn graceful_shutdown(&mut self) {
        info!(
            target: "signal.actor.room",
            room_id = %self.room_id,
            peers = self.peers.len(),
            "room shutting down"
        );
        for peer in self.peers.values_mut() {
            if let Some(socket) = peer.socket.take() {
                socket.close(CLOSE_NORMAL, "server shutting down");
            }
        }
    }
}
