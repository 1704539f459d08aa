//! End-to-end tests for status, capability listing, health and metrics

mod common;

use common::{TestClient, TestServer, USER_IDENTITY};
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn test_health_is_ready() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let response = client.health().await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "healthy": true }));
}

#[tokio::test]
async fn test_health_goes_down_on_shutdown() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    server.service.shutdown();
    assert_eq!(client.health().await.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = client.invoke("echo", json!({ "text": "late" })).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_capabilities_listing_has_metadata_only() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());

    let body: Value = client.list_capabilities().await.json().await.unwrap();
    let capabilities = body["capabilities"].as_array().unwrap();
    assert_eq!(capabilities.len(), 5);

    let echo = capabilities.iter().find(|c| c["name"] == "echo").unwrap();
    assert_eq!(echo["kind"], "tool");
    assert!(echo.get("inputSchema").is_some());
    assert!(echo.get("handler").is_none());

    let config = capabilities.iter().find(|c| c["uri"] == "config://settings").unwrap();
    assert_eq!(config["requiredScopes"], json!(["admin"]));
}

#[tokio::test]
async fn test_status_counts_and_redaction() {
    let server = TestServer::spawn().await;
    let user = TestClient::user(server.base_url.clone());
    user.invoke("echo", json!({ "text": "x" })).await;

    let body: Value = user.status().await.json().await.unwrap();
    assert_eq!(body["capabilities"], 5);
    assert!(body["uptimeSeconds"].is_u64());
    let key = body["rateLimits"][0]["key"].as_str().unwrap();
    assert!(!key.contains(USER_IDENTITY));
    assert!(key.ends_with(":echo"));

    let admin = TestClient::admin(server.base_url.clone());
    let body: Value = admin.status().await.json().await.unwrap();
    let keys: Vec<&str> = body["rateLimits"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["key"].as_str().unwrap())
        .collect();
    assert!(keys.contains(&"alice:echo"));
}

#[tokio::test]
async fn test_status_does_not_consume_quota() {
    let server = TestServer::spawn().await;
    let client = TestClient::user(server.base_url.clone());
    client.invoke("echo", json!({ "text": "x" })).await;

    let first: Value = client.status().await.json().await.unwrap();
    let second: Value = client.status().await.json().await.unwrap();
    assert_eq!(first["rateLimits"][0]["count"], 1);
    assert_eq!(second["rateLimits"][0]["count"], 1);
}

#[tokio::test]
async fn test_metrics_exposes_invocation_counters() {
    let server = TestServer::spawn().await;
    let client = TestClient::new(server.base_url.clone());
    client.invoke("echo", json!({ "text": "x" })).await;

    let response = client.metrics().await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = response.text().await.unwrap();
    assert!(text.contains("mcp_invocations_total"));
}
