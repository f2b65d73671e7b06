//! WebSocket front door: authenticate, upgrade, and drive one session.
//!
//! The handler verifies the join token against the room in the path before
//! the upgrade completes, so an unauthorized caller never opens a socket.
//! After the upgrade, the write half goes to a `SocketActor` owned by the
//! room and this task becomes the read loop, decoding frames and feeding
//! them into the room's mailbox until the transport ends.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::HeaderMap,
    response::Response,
};
use common::jwt::{self, JoinClaims};
use common::secret::ExposeSecret;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::extract_token;
use crate::actors::messages::{AttachRequest, DepartCause};
use crate::actors::room::RoomHandle;
use crate::actors::socket::{SocketActor, CLOSE_INTERNAL};
use crate::errors::ApiError;
use crate::routes::AppState;
use crate::wire::{self, DecodeError, ErrorCode, ServerMessage};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    pub token: Option<String>,
    pub resume_token: Option<String>,
}

/// `GET /ws/:room_id` - authenticated WebSocket attach.
#[instrument(skip_all, name = "signal.ws.upgrade", fields(room_id = %room_id))]
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ApiError> {
    let token = extract_token(&headers, query.token.as_deref())
        .ok_or_else(|| ApiError::Unauthorized("missing token".to_string()))?;

    let claims = jwt::verify(
        &token,
        state.config.join_token_secret.expose_secret().as_bytes(),
        Some(&room_id),
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| {
        debug!(target: "signal.ws", room_id = %room_id, error = %e, "join token rejected");
        ApiError::Unauthorized("invalid or expired token".to_string())
    })?;

    let ws = ws.ok_or(ApiError::ExpectedWebSocket)?;

    let room = state.rooms.room(&room_id).await;
    let resume_token = query.resume_token;

    Ok(ws.on_upgrade(move |socket| drive_session(socket, room, claims, resume_token)))
}

/// Owns one client connection from upgrade to departure.
async fn drive_session(
    socket: WebSocket,
    room: RoomHandle,
    claims: JoinClaims,
    resume_token: Option<String>,
) {
    let (sink, mut stream) = socket.split();
    let connection_id = Uuid::new_v4().to_string();
    let (socket_handle, _writer_task) =
        SocketActor::spawn(connection_id.clone(), sink, room.child_token());

    let attached = match room
        .attach(AttachRequest {
            user_id: claims.sub,
            name: claims.name,
            resume_token,
            socket: socket_handle.clone(),
        })
        .await
    {
        Ok(attached) => attached,
        Err(e) => {
            warn!(
                target: "signal.ws",
                room_id = %room.room_id(),
                error = %e,
                "attachment failed"
            );
            socket_handle.close(CLOSE_INTERNAL, "attachment failed");
            return;
        }
    };
    let peer_id = attached.peer_id;

    let mut cause = DepartCause::TransportClosed;
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match wire::decode_client_message(&text) {
                Ok(msg) => {
                    if room
                        .frame(
                            peer_id.clone(),
                            connection_id.clone(),
                            socket_handle.clone(),
                            msg,
                        )
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(DecodeError::BadMessage(detail)) => {
                    debug!(
                        target: "signal.ws",
                        peer_id = %peer_id,
                        detail = %detail,
                        "undecodable frame"
                    );
                    let _ = socket_handle.send(ServerMessage::Error {
                        code: ErrorCode::BadMessage,
                        message: "message could not be parsed".to_string(),
                        request_id: None,
                    });
                }
                Err(DecodeError::Unsupported {
                    msg_type,
                    request_id,
                }) => {
                    let _ = socket_handle.send(ServerMessage::Error {
                        code: ErrorCode::Unsupported,
                        message: format!("unsupported message type: {msg_type}"),
                        request_id,
                    });
                }
            },

            Ok(Message::Binary(_)) => {
                let _ = socket_handle.send(ServerMessage::Error {
                    code: ErrorCode::BadMessage,
                    message: "binary frames are not supported".to_string(),
                    request_id: None,
                });
            }

            // axum answers pings at the protocol level
            Ok(Message::Ping(_) | Message::Pong(_)) => {}

            Ok(Message::Close(_)) => break,

            Err(e) => {
                debug!(
                    target: "signal.ws",
                    peer_id = %peer_id,
                    error = %e,
                    "transport error"
                );
                cause = DepartCause::TransportError;
                break;
            }
        }
    }

    let _ = room.depart(peer_id, connection_id, cause).await;
}
