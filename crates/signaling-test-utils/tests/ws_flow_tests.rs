//! End-to-end WebSocket flows: handshake, discovery, relay with
//! acknowledgements, resume, and protocol errors — all driven through a
//! real server and real client sockets.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use signaling_test_utils::TestServer;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{self, protocol::Message},
    MaybeTlsStream, WebSocketStream,
};

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn connect(server: &TestServer, room: &str, token: &str, resume: Option<&str>) -> Ws {
    let mut url = format!("{}?token={token}", server.ws_url(room));
    if let Some(resume_token) = resume {
        url.push_str(&format!("&resumeToken={resume_token}"));
    }
    let (ws, _response) = connect_async(url).await.expect("websocket connect failed");
    ws
}

async fn recv_msg(ws: &mut Ws) -> serde_json::Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("socket stream ended")
            .expect("websocket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn send_msg(ws: &mut Ws, value: &serde_json::Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_two_peer_handshake() {
    let server = TestServer::spawn().await.unwrap();

    let alice_token = server.join_token("alice", "R", Some("alice"));
    let mut alice = connect(&server, "R", &alice_token, None).await;

    let welcome = recv_msg(&mut alice).await;
    assert_eq!(welcome["type"], "session.welcome");
    assert_eq!(welcome["userId"], "alice");
    assert_eq!(welcome["roomId"], "R");
    assert_eq!(welcome["peers"].as_array().unwrap().len(), 0);
    let alice_peer_id = welcome["peerId"].as_str().unwrap().to_string();

    let bob_token = server.join_token("bob", "R", Some("bob"));
    let mut bob = connect(&server, "R", &bob_token, None).await;

    let welcome = recv_msg(&mut bob).await;
    assert_eq!(welcome["type"], "session.welcome");
    let peers = welcome["peers"].as_array().unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["peerId"], alice_peer_id.as_str());
    assert_eq!(peers[0]["name"], "alice");

    let joined = recv_msg(&mut alice).await;
    assert_eq!(joined["type"], "presence.joined");
    assert_eq!(joined["peer"]["name"], "bob");
    assert_eq!(joined["peer"]["peerId"], welcome["peerId"]);
}

#[tokio::test]
async fn test_alias_resolution_and_relay() {
    let server = TestServer::spawn().await.unwrap();

    let mut alice = connect(&server, "R", &server.join_token("alice", "R", Some("alice")), None).await;
    let alice_welcome = recv_msg(&mut alice).await;
    let alice_peer_id = alice_welcome["peerId"].as_str().unwrap().to_string();

    let mut bob = connect(&server, "R", &server.join_token("bob", "R", Some("bob")), None).await;
    let bob_welcome = recv_msg(&mut bob).await;
    let bob_peer_id = bob_welcome["peerId"].as_str().unwrap().to_string();
    let _ = recv_msg(&mut alice).await; // presence.joined for bob

    // Resolve bob by alias
    send_msg(
        &mut alice,
        &serde_json::json!({"type": "discovery.resolve", "requestId": "r1", "name": "bob"}),
    )
    .await;
    let resolved = recv_msg(&mut alice).await;
    assert_eq!(resolved["type"], "discovery.resolved");
    assert_eq!(resolved["requestId"], "r1");
    assert_eq!(resolved["name"], "bob");
    assert_eq!(resolved["peers"][0]["peerId"], bob_peer_id.as_str());

    // Relay an offer
    let payload = serde_json::json!({
        "kind": "offer",
        "description": {"type": "offer", "sdp": "v=0"}
    });
    send_msg(
        &mut alice,
        &serde_json::json!({
            "type": "signal.send",
            "deliveryId": "d1",
            "toPeerId": bob_peer_id,
            "payload": payload
        }),
    )
    .await;

    // Admission ack first, from the server on behalf of the sender side
    let acked = recv_msg(&mut alice).await;
    assert_eq!(acked["type"], "signal.acked");
    assert_eq!(acked["deliveryId"], "d1");
    assert_eq!(acked["byPeerId"], alice_peer_id.as_str());

    // Bob receives the payload verbatim
    let message = recv_msg(&mut bob).await;
    assert_eq!(message["type"], "signal.message");
    assert_eq!(message["deliveryId"], "d1");
    assert_eq!(message["fromPeerId"], alice_peer_id.as_str());
    assert_eq!(message["payload"], payload);

    // Bob confirms; alice sees the second ack
    send_msg(
        &mut bob,
        &serde_json::json!({
            "type": "signal.ack",
            "deliveryId": "d1",
            "toPeerId": alice_peer_id
        }),
    )
    .await;
    let confirmed = recv_msg(&mut alice).await;
    assert_eq!(confirmed["type"], "signal.acked");
    assert_eq!(confirmed["deliveryId"], "d1");
    assert_eq!(confirmed["byPeerId"], bob_peer_id.as_str());
}

#[tokio::test]
async fn test_resume_across_disconnect() {
    let server = TestServer::spawn().await.unwrap();

    let mut alice = connect(&server, "R", &server.join_token("alice", "R", Some("alice")), None).await;
    let welcome = recv_msg(&mut alice).await;
    let peer_id = welcome["peerId"].as_str().unwrap().to_string();
    let resume_token = welcome["resumeToken"].as_str().unwrap().to_string();
    assert!(welcome["resumeExpiresAt"].as_i64().unwrap() > chrono::Utc::now().timestamp_millis());

    alice.close(None).await.unwrap();
    // Give the server a moment to process the departure
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Reconnect with a fresh join token and the resume token
    let fresh_token = server.join_token("alice", "R", None);
    let mut alice2 = connect(&server, "R", &fresh_token, Some(&resume_token)).await;

    let welcome2 = recv_msg(&mut alice2).await;
    assert_eq!(welcome2["type"], "session.welcome");
    assert_eq!(welcome2["peerId"], peer_id.as_str(), "identity preserved");
    assert_ne!(
        welcome2["resumeToken"].as_str().unwrap(),
        resume_token,
        "resume token rotated"
    );
}

#[tokio::test]
async fn test_resume_token_of_other_user_is_ignored() {
    let server = TestServer::spawn().await.unwrap();

    let mut alice = connect(&server, "R", &server.join_token("alice", "R", None), None).await;
    let welcome = recv_msg(&mut alice).await;
    let alice_peer_id = welcome["peerId"].as_str().unwrap().to_string();
    let stolen_token = welcome["resumeToken"].as_str().unwrap().to_string();

    // Mallory presents alice's resume token under a different user id
    let mut mallory = connect(
        &server,
        "R",
        &server.join_token("mallory", "R", None),
        Some(&stolen_token),
    )
    .await;
    let welcome = recv_msg(&mut mallory).await;
    assert_ne!(
        welcome["peerId"].as_str().unwrap(),
        alice_peer_id,
        "identity not adopted across users"
    );
}

#[tokio::test]
async fn test_alias_conflict_keeps_session() {
    let server = TestServer::spawn().await.unwrap();

    let mut alice = connect(&server, "R", &server.join_token("alice", "R", Some("alice")), None).await;
    let _ = recv_msg(&mut alice).await;

    // Bob's token claims alice's alias
    let mut bob = connect(&server, "R", &server.join_token("bob", "R", Some("alice")), None).await;

    let welcome = recv_msg(&mut bob).await;
    assert_eq!(welcome["type"], "session.welcome");

    let error = recv_msg(&mut bob).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "ALIAS_TAKEN");

    // The session survives the conflict
    send_msg(&mut bob, &serde_json::json!({"type": "heartbeat.ping", "ts": 5})).await;
    let pong = recv_msg(&mut bob).await;
    assert_eq!(pong["type"], "heartbeat.pong");
    assert_eq!(pong["ts"], 5.0);
}

#[tokio::test]
async fn test_connect_without_valid_token_is_rejected() {
    let server = TestServer::spawn().await.unwrap();

    let url = format!("{}?token=garbage", server.ws_url("R"));
    let result = connect_async(url).await;
    match result {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected HTTP 401 rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_token_for_other_room_is_rejected() {
    let server = TestServer::spawn().await.unwrap();

    // Valid signature, wrong room binding
    let token = server.join_token("alice", "other-room", None);
    let url = format!("{}?token={token}", server.ws_url("R"));
    let result = connect_async(url).await;
    match result {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), 401);
        }
        other => panic!("expected HTTP 401 rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unknown_message_type_is_unsupported() {
    let server = TestServer::spawn().await.unwrap();

    let mut alice = connect(&server, "R", &server.join_token("alice", "R", None), None).await;
    let _ = recv_msg(&mut alice).await;

    send_msg(
        &mut alice,
        &serde_json::json!({"type": "room.nuke", "requestId": "r7"}),
    )
    .await;
    let error = recv_msg(&mut alice).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "UNSUPPORTED");
    assert_eq!(error["requestId"], "r7");
}

#[tokio::test]
async fn test_malformed_and_binary_frames_are_bad_message() {
    let server = TestServer::spawn().await.unwrap();

    let mut alice = connect(&server, "R", &server.join_token("alice", "R", None), None).await;
    let _ = recv_msg(&mut alice).await;

    alice
        .send(Message::Text("{not json".to_string()))
        .await
        .unwrap();
    let error = recv_msg(&mut alice).await;
    assert_eq!(error["code"], "BAD_MESSAGE");

    alice
        .send(Message::Binary(vec![0xde, 0xad, 0xbe, 0xef]))
        .await
        .unwrap();
    let error = recv_msg(&mut alice).await;
    assert_eq!(error["code"], "BAD_MESSAGE");
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let server = TestServer::spawn().await.unwrap();

    let mut alice = connect(&server, "room-a", &server.join_token("alice", "room-a", Some("alice")), None).await;
    let _ = recv_msg(&mut alice).await;

    // Same alias in a different room is not a conflict
    let mut bob = connect(&server, "room-b", &server.join_token("bob", "room-b", Some("alice")), None).await;
    let welcome = recv_msg(&mut bob).await;
    assert_eq!(welcome["type"], "session.welcome");
    assert_eq!(welcome["peers"].as_array().unwrap().len(), 0);

    // No cross-room presence leaked to alice
    send_msg(&mut alice, &serde_json::json!({"type": "heartbeat.ping", "ts": 1})).await;
    let pong = recv_msg(&mut alice).await;
    assert_eq!(pong["type"], "heartbeat.pong");
}
