use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use serde::Deserialize;

use super::{CredentialVerifier, VerificationError, VerifiedCredential};

/// A configured bearer token and what it grants
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StaticGrant {
    pub token: String,
    pub identity: String,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl StaticGrant {
    pub fn new<I, S>(token: impl Into<String>, identity: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            token: token.into(),
            identity: identity.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }
}

/// Verifies against a fixed table of tokens. Tokens never expire.
pub struct StaticTokenVerifier {
    grants: HashMap<String, StaticGrant>,
}

impl StaticTokenVerifier {
    pub fn new(grants: impl IntoIterator<Item = StaticGrant>) -> Self {
        Self {
            grants: grants.into_iter().map(|g| (g.token.clone(), g)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl CredentialVerifier for StaticTokenVerifier {
    async fn verify(&self, credential: &str) -> Result<VerifiedCredential, VerificationError> {
        let grant = self
            .grants
            .get(credential)
            .ok_or_else(|| VerificationError::Invalid("unknown token".to_string()))?;
        Ok(VerifiedCredential {
            identity: grant.identity.clone(),
            scopes: grant.scopes.clone(),
            expires_at: None,
        })
    }
}
