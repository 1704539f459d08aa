//! Authentication and Authorization
//!
//! The [`AuthGatekeeper`] turns a raw credential into an identity and scope
//! set through a [`CredentialVerifier`], then checks the capability's
//! required scopes. Missing, invalid or expired credentials on a scoped
//! capability are `Unauthorized`; a verified credential without every
//! required scope is `Forbidden`.

mod cache;
mod introspection;
mod jwt;
mod static_tokens;

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

pub use self::cache::VerificationCache;
pub use self::introspection::IntrospectionVerifier;
pub use self::jwt::JwtVerifier;
pub use self::static_tokens::{StaticGrant, StaticTokenVerifier};

use super::context::{Identity, RequestContext};
use super::error::InvocationError;
use super::middleware::{Invocation, Next, Stage, StageResult};
use crate::config::{AuthMode, AuthSettings};

/// What a verifier learned from a credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCredential {
    pub identity: String,
    pub scopes: BTreeSet<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl VerifiedCredential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

#[derive(Debug, Clone, Error)]
pub enum VerificationError {
    #[error("Malformed credential")]
    Malformed,

    #[error("Invalid credential: {0}")]
    Invalid(String),

    #[error("Credential expired")]
    Expired,

    #[error("Verifier unavailable: {0}")]
    Unavailable(String),
}

impl From<VerificationError> for InvocationError {
    fn from(err: VerificationError) -> Self {
        match err {
            VerificationError::Unavailable(detail) => {
                InvocationError::Internal(format!("credential verification unavailable: {}", detail))
            }
            other => InvocationError::Unauthorized(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, credential: &str) -> Result<VerifiedCredential, VerificationError>;

    /// Whether results may be cached until the credential's expiry.
    fn cacheable(&self) -> bool {
        false
    }
}

/// Space-separated scope string to a set (the OAuth `scope` claim format)
pub fn parse_scopes(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

pub struct AuthGatekeeper {
    verifier: Option<Arc<dyn CredentialVerifier>>,
    cache: Option<VerificationCache>,
}

impl AuthGatekeeper {
    pub fn new(verifier: Arc<dyn CredentialVerifier>, cache_size: usize) -> Self {
        let cache = if verifier.cacheable() {
            VerificationCache::new(cache_size)
        } else {
            None
        };
        Self {
            verifier: Some(verifier),
            cache,
        }
    }

    /// No verifier: public capabilities work, scoped ones are always
    /// `Unauthorized`.
    pub fn disabled() -> Self {
        Self {
            verifier: None,
            cache: None,
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Result<Self> {
        let verifier: Arc<dyn CredentialVerifier> = match &settings.mode {
            AuthMode::None => {
                info!("Authentication disabled, only public capabilities are reachable");
                return Ok(Self::disabled());
            }
            AuthMode::Static { tokens } => {
                if tokens.is_empty() {
                    bail!("auth mode \"static\" requires at least one token");
                }
                Arc::new(StaticTokenVerifier::new(tokens.iter().cloned()))
            }
            AuthMode::Jwt {
                secret,
                issuer,
                audience,
            } => Arc::new(JwtVerifier::new(secret, issuer.as_deref(), audience.as_deref())),
            AuthMode::Introspection {
                url,
                client_id,
                client_secret,
            } => Arc::new(IntrospectionVerifier::new(
                url.clone(),
                client_id.clone(),
                client_secret.clone(),
            )?),
        };
        info!("Authentication mode: {}", settings.mode.name());
        Ok(Self::new(verifier, settings.cache_size))
    }

    pub fn is_enabled(&self) -> bool {
        self.verifier.is_some()
    }

    /// Verify a credential, consulting the cache when the verifier allows it.
    pub async fn verify(&self, credential: &str) -> Result<VerifiedCredential, InvocationError> {
        let Some(verifier) = &self.verifier else {
            return Err(InvocationError::Unauthorized(
                "no credential verifier configured".to_string(),
            ));
        };

        let now = Utc::now();
        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(credential, now)) {
            debug!("Credential cache hit for {}", cached.identity);
            return Ok(cached);
        }

        let verified = verifier.verify(credential).await?;
        if verified.is_expired_at(now) {
            return Err(VerificationError::Expired.into());
        }
        if let Some(cache) = &self.cache {
            cache.insert(credential, &verified);
        }
        Ok(verified)
    }

    /// Decide whether `credential` may invoke something requiring `required`.
    /// Returns the verified credential when one was presented.
    pub async fn authorize(
        &self,
        credential: Option<&str>,
        required: &BTreeSet<String>,
    ) -> Result<Option<VerifiedCredential>, InvocationError> {
        let credential = credential.map(str::trim).filter(|c| !c.is_empty());

        let verified = match credential {
            None if required.is_empty() => return Ok(None),
            None => {
                return Err(InvocationError::Unauthorized("no credential presented".to_string()))
            }
            // Without a verifier a credential cannot be checked; public
            // capabilities stay reachable regardless.
            Some(_) if required.is_empty() && !self.is_enabled() => return Ok(None),
            Some(credential) => self.verify(credential).await?,
        };

        let missing: Vec<String> = required.difference(&verified.scopes).cloned().collect();
        if !missing.is_empty() {
            return Err(InvocationError::Forbidden { missing });
        }
        Ok(Some(verified))
    }
}

#[async_trait]
impl Stage for AuthGatekeeper {
    fn name(&self) -> &'static str {
        "auth"
    }

    async fn handle(&self, ctx: &mut RequestContext, invocation: &Invocation, next: Next<'_>) -> StageResult {
        let verified = self
            .authorize(invocation.credential.as_deref(), &invocation.descriptor.required_scopes)
            .await?;

        if let Some(verified) = verified {
            ctx.record("identity", verified.identity.as_str());
            ctx.identity = Identity::Principal(verified.identity);
            ctx.scopes = verified.scopes;
        }
        next.run(ctx, invocation).await
    }
}
