//! Invocation Context
//!
//! Per-request state threaded through the middleware chain, and the
//! read-only view of it that capability handlers receive.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::rate_limit::Quota;

/// Who is calling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    Anonymous,
    Principal(String),
}

impl Identity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Anonymous => f.write_str("anonymous"),
            Identity::Principal(name) => f.write_str(name),
        }
    }
}

/// Longest time budget a single invocation can get.
pub const MAX_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Mutable per-request state. Created by the dispatcher, owned by exactly one
/// invocation, dropped when the result is returned.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,

    /// Name of the capability being invoked
    pub capability: String,

    pub identity: Identity,

    /// Scopes granted by the verified credential, empty when anonymous
    pub scopes: BTreeSet<String>,

    pub deadline: Instant,

    /// Set by the rate limit stage once the call has been counted
    pub quota: Option<Quota>,

    /// Structured fields attached by stages for the logging collaborator
    pub trace_fields: BTreeMap<String, String>,

    budget: Duration,
    started_at: Instant,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, capability: impl Into<String>, budget: Duration) -> Self {
        let budget = budget.min(MAX_BUDGET);
        let started_at = Instant::now();
        Self {
            request_id: request_id.into(),
            capability: capability.into(),
            identity: Identity::Anonymous,
            scopes: BTreeSet::new(),
            deadline: started_at + budget,
            quota: None,
            trace_fields: BTreeMap::new(),
            budget,
            started_at,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn record(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.trace_fields.insert(key.into(), value.into());
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_authenticated(&self) -> bool {
        !self.identity.is_anonymous()
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    /// Snapshot handed to the capability handler.
    pub fn handler_context(&self) -> HandlerContext {
        HandlerContext {
            request_id: self.request_id.clone(),
            identity: self.identity.clone(),
            scopes: self.scopes.clone(),
            deadline: self.deadline,
            cancellation: self.cancellation.clone(),
        }
    }
}

/// Context provided to capability handlers during execution.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    pub request_id: String,
    pub identity: Identity,
    pub scopes: BTreeSet<String>,
    pub deadline: Instant,
    cancellation: CancellationToken,
}

impl HandlerContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.contains(scope)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the invocation has been cancelled (deadline passed or
    /// the server gave up on it).
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        assert_eq!(Identity::Anonymous.to_string(), "anonymous");
        assert_eq!(Identity::Principal("u1".to_string()).to_string(), "u1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_budget_is_clamped() {
        let ctx = RequestContext::new("r", "echo", Duration::MAX);
        assert_eq!(ctx.budget(), MAX_BUDGET);
        assert_eq!(ctx.remaining(), MAX_BUDGET);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_tracks_budget() {
        let ctx = RequestContext::new("r", "echo", Duration::from_secs(5));
        assert_eq!(ctx.remaining(), Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(ctx.remaining(), Duration::from_secs(3));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_cancel_reaches_handler_context() {
        let ctx = RequestContext::new("r", "echo", Duration::from_secs(5));
        let handler_ctx = ctx.handler_context();
        assert!(!handler_ctx.is_cancelled());
        ctx.cancel();
        assert!(handler_ctx.is_cancelled());
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(new_request_id(), new_request_id());
    }
}
