//! `SocketActor` - per-connection writer actor.
//!
//! Each `SocketActor` owns the write half of one WebSocket. The room actor
//! holds a [`SocketHandle`] and enqueues frames without awaiting transport
//! I/O; the actor drains the mailbox into the sink. A failed or refused
//! enqueue is how the room learns a socket is dead (transport departure).
//!
//! The actor exits when it is told to close, when a sink write fails, or
//! when its cancellation token fires (server shutdown).

use axum::extract::ws::{CloseFrame, Message};
use futures::{Sink, SinkExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::wire::{self, ServerMessage};

/// Outbound mailbox depth per socket. A socket that cannot drain this many
/// frames is treated as gone rather than buffering without bound.
const SOCKET_CHANNEL_BUFFER: usize = 256;

/// WebSocket close code for a normal close.
pub const CLOSE_NORMAL: u16 = 1000;

/// WebSocket close code for a stale or invalid attachment.
pub const CLOSE_INTERNAL: u16 = 1011;

/// WebSocket close code when a new session supersedes this socket.
pub const CLOSE_SUPERSEDED: u16 = 1012;

enum SocketCommand {
    Frame(ServerMessage),
    Close { code: u16, reason: String },
}

/// Error type for enqueueing onto a socket.
#[derive(Debug, Error)]
pub enum SocketSendError {
    /// Outbound buffer is over the high-water mark.
    #[error("socket send queue full")]
    Full,
    /// The writer actor has exited.
    #[error("socket closed")]
    Closed,
}

/// Handle to a `SocketActor`. Cheap to clone.
#[derive(Clone, Debug)]
pub struct SocketHandle {
    sender: mpsc::Sender<SocketCommand>,
    connection_id: String,
}

impl SocketHandle {
    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Enqueue a frame for the client.
    ///
    /// # Errors
    ///
    /// `Full` when the outbound buffer is saturated, `Closed` when the
    /// writer has exited. Both are treated as a transport departure by
    /// callers.
    pub fn send(&self, msg: ServerMessage) -> Result<(), SocketSendError> {
        self.sender
            .try_send(SocketCommand::Frame(msg))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SocketSendError::Full,
                mpsc::error::TrySendError::Closed(_) => SocketSendError::Closed,
            })
    }

    /// Ask the writer to close the socket with a code and reason. Best
    /// effort: a socket that is already gone needs no close frame.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.sender.try_send(SocketCommand::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// The `SocketActor` implementation.
///
/// Generic over the sink so tests can substitute an in-memory channel for
/// the WebSocket write half.
pub struct SocketActor;

impl SocketActor {
    /// Spawn a writer actor over `sink`.
    pub fn spawn<S>(
        connection_id: String,
        sink: S,
        cancel_token: CancellationToken,
    ) -> (SocketHandle, JoinHandle<()>)
    where
        S: Sink<Message> + Send + Unpin + 'static,
        S::Error: std::fmt::Display,
    {
        let (sender, receiver) = mpsc::channel(SOCKET_CHANNEL_BUFFER);

        let task_handle = tokio::spawn(run(connection_id.clone(), sink, receiver, cancel_token));

        (
            SocketHandle {
                sender,
                connection_id,
            },
            task_handle,
        )
    }
}

async fn run<S>(
    connection_id: String,
    mut sink: S,
    mut receiver: mpsc::Receiver<SocketCommand>,
    cancel_token: CancellationToken,
) where
    S: Sink<Message> + Send + Unpin + 'static,
    S::Error: std::fmt::Display,
{
    debug!(
        target: "signal.actor.socket",
        connection_id = %connection_id,
        "socket writer started"
    );

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                send_close(&mut sink, &connection_id, CLOSE_NORMAL, "server shutting down").await;
                break;
            }

            cmd = receiver.recv() => {
                match cmd {
                    Some(SocketCommand::Frame(msg)) => {
                        let text = match wire::encode_server_message(&msg) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!(
                                    target: "signal.actor.socket",
                                    connection_id = %connection_id,
                                    error = %e,
                                    "dropping unencodable frame"
                                );
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            debug!(
                                target: "signal.actor.socket",
                                connection_id = %connection_id,
                                error = %e,
                                "socket write failed, exiting"
                            );
                            break;
                        }
                    }

                    Some(SocketCommand::Close { code, reason }) => {
                        send_close(&mut sink, &connection_id, code, &reason).await;
                        break;
                    }

                    None => break,
                }
            }
        }
    }

    debug!(
        target: "signal.actor.socket",
        connection_id = %connection_id,
        "socket writer stopped"
    );
}

async fn send_close<S>(sink: &mut S, connection_id: &str, code: u16, reason: &str)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!(
            target: "signal.actor.socket",
            connection_id = %connection_id,
            error = %e,
            "close frame not delivered"
        );
    }
}
