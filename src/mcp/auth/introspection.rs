use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use tracing::warn;

use super::{parse_scopes, CredentialVerifier, VerificationError, VerifiedCredential};

const INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(5);

/// RFC 7662 introspection response, only the fields we use
#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    active: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

impl IntrospectionResponse {
    fn into_verified(self) -> Result<VerifiedCredential, VerificationError> {
        if !self.active {
            return Err(VerificationError::Invalid("token is not active".to_string()));
        }
        let identity = self
            .sub
            .or(self.username)
            .ok_or_else(|| VerificationError::Invalid("introspection returned no subject".to_string()))?;
        Ok(VerifiedCredential {
            identity,
            scopes: self.scope.as_deref().map(parse_scopes).unwrap_or_default(),
            expires_at: self.exp.and_then(|exp| DateTime::from_timestamp(exp, 0)),
        })
    }
}

/// Asks an authorization server whether a token is active.
pub struct IntrospectionVerifier {
    client: reqwest::Client,
    url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl IntrospectionVerifier {
    pub fn new(url: String, client_id: Option<String>, client_secret: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(INTROSPECTION_TIMEOUT)
            .build()
            .context("Failed to build introspection HTTP client")?;
        Ok(Self {
            client,
            url,
            client_id,
            client_secret,
        })
    }
}

#[async_trait]
impl CredentialVerifier for IntrospectionVerifier {
    async fn verify(&self, credential: &str) -> Result<VerifiedCredential, VerificationError> {
        let mut request = self.client.post(&self.url).form(&[("token", credential)]);
        if let Some(client_id) = &self.client_id {
            request = request.basic_auth(client_id, self.client_secret.as_deref());
        }

        let response = request.send().await.map_err(|e| {
            warn!("Introspection request to {} failed: {}", self.url, e);
            VerificationError::Unavailable(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(VerificationError::Unavailable(format!(
                "introspection endpoint returned {}",
                status
            )));
        }

        let body: IntrospectionResponse = response
            .json()
            .await
            .map_err(|e| VerificationError::Unavailable(format!("bad introspection response: {}", e)))?;
        body.into_verified()
    }

    fn cacheable(&self) -> bool {
        true
    }
}
