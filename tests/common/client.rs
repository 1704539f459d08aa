//! HTTP client for end-to-end tests
//!
//! Wraps reqwest with one method per server endpoint. When routes or
//! request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::{json, Value};
use std::time::Duration;

pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    pub base_url: String,
    /// Sent as `Authorization: Bearer` when set
    pub token: Option<String>,
}

impl TestClient {
    /// Creates a client without credentials
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            token: None,
        }
    }

    /// Creates a client sending `token` as its bearer credential
    pub fn with_token(base_url: String, token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            ..Self::new(base_url)
        }
    }

    pub fn admin(base_url: String) -> Self {
        Self::with_token(base_url, ADMIN_TOKEN)
    }

    pub fn user(base_url: String) -> Self {
        Self::with_token(base_url, USER_TOKEN)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    /// POST /v1/invoke
    pub async fn invoke(&self, capability: &str, arguments: Value) -> Response {
        self.invoke_raw(json!({ "capability": capability, "arguments": arguments }))
            .await
    }

    /// POST /v1/invoke with an arbitrary body
    pub async fn invoke_raw(&self, body: Value) -> Response {
        self.authorize(self.client.post(format!("{}/v1/invoke", self.base_url)))
            .json(&body)
            .send()
            .await
            .expect("Invoke request failed")
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub async fn list_capabilities(&self) -> Response {
        self.authorize(self.client.get(format!("{}/v1/capabilities", self.base_url)))
            .send()
            .await
            .expect("Capabilities request failed")
    }

    pub async fn status(&self) -> Response {
        self.authorize(self.client.get(format!("{}/v1/status", self.base_url)))
            .send()
            .await
            .expect("Status request failed")
    }

    pub async fn health(&self) -> Response {
        self.client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .expect("Health request failed")
    }

    pub async fn metrics(&self) -> Response {
        self.client
            .get(format!("{}/metrics", self.base_url))
            .send()
            .await
            .expect("Metrics request failed")
    }

    // ========================================================================
    // JSON-RPC
    // ========================================================================

    /// POST /v1/mcp, returns the decoded JSON-RPC response
    pub async fn rpc(&self, method: &str, params: Value) -> Value {
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        self.authorize(self.client.post(format!("{}/v1/mcp", self.base_url)))
            .json(&body)
            .send()
            .await
            .expect("MCP request failed")
            .json()
            .await
            .expect("MCP response is not JSON")
    }
}
