//! End-to-end tests for the HTTP surface: health, dev token issuance,
//! TURN credentials, and rate limiting.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;

use signaling_test_utils::server_harness::{TEST_INTERNAL_SECRET, TEST_JOIN_SECRET};
use signaling_test_utils::TestServer;

#[tokio::test]
async fn test_health_endpoint() {
    let server = TestServer::spawn().await.unwrap();

    let response = reqwest::get(format!("{}/health", server.url()))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert!(body["now"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn test_token_issue_requires_flag() {
    let server = TestServer::spawn_with(HashMap::from([(
        "ALLOW_DEV_TOKEN_ISSUER".to_string(),
        "false".to_string(),
    )]))
    .await
    .unwrap();

    let response = reqwest::Client::new()
        .post(format!("{}/token/issue", server.url()))
        .header("x-internal-secret", TEST_INTERNAL_SECRET)
        .json(&serde_json::json!({"userId": "alice", "roomId": "R"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "DEV_ISSUER_DISABLED");
}

#[tokio::test]
async fn test_token_issue_requires_secret() {
    let server = TestServer::spawn().await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("{}/token/issue", server.url()))
        .header("x-internal-secret", "wrong-secret")
        .json(&serde_json::json!({"userId": "alice", "roomId": "R"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 403);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "FORBIDDEN");
}

#[tokio::test]
async fn test_token_issue_returns_verifiable_token() {
    let server = TestServer::spawn().await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("{}/token/issue", server.url()))
        .header("x-internal-secret", TEST_INTERNAL_SECRET)
        .json(&serde_json::json!({
            "userId": "alice",
            "roomId": "R",
            "name": "alice",
            "ttlSeconds": 120
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["roomId"], "R");
    assert_eq!(body["userId"], "alice");
    assert_eq!(body["name"], "alice");

    let token = body["token"].as_str().unwrap();
    let claims = common::jwt::verify(
        token,
        TEST_JOIN_SECRET.as_bytes(),
        Some("R"),
        chrono::Utc::now().timestamp(),
    )
    .unwrap();
    assert_eq!(claims.sub, "alice");
    assert_eq!(claims.name.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_token_issue_clamps_ttl() {
    let server = TestServer::spawn().await.unwrap();
    let client = reqwest::Client::new();

    // Below the minimum: clamped up to 30 seconds
    let response = client
        .post(format!("{}/token/issue", server.url()))
        .header("x-internal-secret", TEST_INTERNAL_SECRET)
        .json(&serde_json::json!({"userId": "a", "roomId": "R", "ttlSeconds": 1}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    let now_ms = chrono::Utc::now().timestamp_millis();
    let expires_at = body["expiresAt"].as_i64().unwrap();
    assert!(expires_at >= now_ms + 25_000, "ttl clamped to >= 30s");
    assert!(expires_at <= now_ms + 35_000);

    // Above the maximum: clamped down to 600 seconds
    let response = client
        .post(format!("{}/token/issue", server.url()))
        .header("x-internal-secret", TEST_INTERNAL_SECRET)
        .json(&serde_json::json!({"userId": "a", "roomId": "R", "ttlSeconds": 86400}))
        .send()
        .await
        .unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    let now_ms = chrono::Utc::now().timestamp_millis();
    let expires_at = body["expiresAt"].as_i64().unwrap();
    assert!(expires_at <= now_ms + 605_000, "ttl clamped to <= 600s");
}

#[tokio::test]
async fn test_token_issue_rejects_empty_ids() {
    let server = TestServer::spawn().await.unwrap();

    let response = reqwest::Client::new()
        .post(format!("{}/token/issue", server.url()))
        .header("x-internal-secret", TEST_INTERNAL_SECRET)
        .json(&serde_json::json!({"userId": "", "roomId": "R"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn test_turn_credentials_require_token() {
    let server = TestServer::spawn().await.unwrap();

    let response = reqwest::get(format!("{}/turn-credentials", server.url()))
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_turn_credentials_stun_only_without_relay_config() {
    let server = TestServer::spawn().await.unwrap();
    let token = server.join_token("alice", "R", None);

    let response = reqwest::get(format!(
        "{}/turn-credentials?token={token}",
        server.url()
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    let ice_servers = body["iceServers"].as_array().unwrap();
    assert_eq!(ice_servers.len(), 1, "STUN block only");
    assert!(ice_servers[0]["username"].is_null());
    assert!(body["rateLimit"]["remaining"].as_i64().is_some());
}

#[tokio::test]
async fn test_turn_credentials_with_relay_configured() {
    let server = TestServer::spawn_with(HashMap::from([
        (
            "TURN_URLS".to_string(),
            "turn:relay.example.com:3478".to_string(),
        ),
        ("TURN_SHARED_SECRET".to_string(), "relay-secret".to_string()),
        ("TURN_TTL_SECONDS".to_string(), "600".to_string()),
    ]))
    .await
    .unwrap();
    let token = server.join_token("alice", "R", None);

    let response = reqwest::get(format!(
        "{}/turn-credentials?token={token}",
        server.url()
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["ttlSeconds"], 600);

    let ice_servers = body["iceServers"].as_array().unwrap();
    assert_eq!(ice_servers.len(), 2);

    let turn_block = &ice_servers[1];
    assert_eq!(turn_block["urls"][0], "turn:relay.example.com:3478");
    let username = turn_block["username"].as_str().unwrap();
    // Username is "<expiresAt>:<userId>"
    let (expiry, user) = username.split_once(':').unwrap();
    assert_eq!(user, "alice");
    assert!(expiry.parse::<i64>().unwrap() > chrono::Utc::now().timestamp());
    assert!(!turn_block["credential"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_turn_credentials_rate_limit() {
    let server = TestServer::spawn_with(HashMap::from([
        ("TURN_RATE_LIMIT_MAX".to_string(), "2".to_string()),
        ("TURN_RATE_LIMIT_WINDOW_SEC".to_string(), "60".to_string()),
    ]))
    .await
    .unwrap();
    let token = server.join_token("alice", "R", None);
    let url = format!("{}/turn-credentials?token={token}", server.url());
    let start_ms = chrono::Utc::now().timestamp_millis();

    let first = reqwest::get(&url).await.unwrap();
    assert_eq!(first.status(), 200);
    let body: serde_json::Value = first.json().await.unwrap();
    assert_eq!(body["rateLimit"]["remaining"], 1);

    let second = reqwest::get(&url).await.unwrap();
    assert_eq!(second.status(), 200);
    let body: serde_json::Value = second.json().await.unwrap();
    assert_eq!(body["rateLimit"]["remaining"], 0);

    let third = reqwest::get(&url).await.unwrap();
    assert_eq!(third.status(), 429);
    let body: serde_json::Value = third.json().await.unwrap();
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
    let reset_at = body["rateLimit"]["resetAt"].as_i64().unwrap();
    assert!(
        reset_at >= start_ms + 60_000,
        "window resets no earlier than first call + 60s"
    );

    // A different user has an independent budget
    let other = server.join_token("bob", "R", None);
    let response = reqwest::get(format!(
        "{}/turn-credentials?token={other}",
        server.url()
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_turn_credentials_reject_bad_token() {
    let server = TestServer::spawn().await.unwrap();

    let response = reqwest::get(format!(
        "{}/turn-credentials?token=not-a-real-token",
        server.url()
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_cors_headers_on_json_endpoints() {
    let server = TestServer::spawn().await.unwrap();

    let response = reqwest::Client::new()
        .get(format!("{}/health", server.url()))
        .header("origin", "https://app.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some("*")
    );
}
