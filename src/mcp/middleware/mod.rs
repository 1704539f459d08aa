//! Middleware Chain
//!
//! An invocation passes through an ordered list of stages before reaching the
//! capability handler. Each stage may short-circuit with an error, or call
//! [`Next::run`] and post-process what comes back, so the first stage sees
//! the request first and the result last.

mod request_id;
mod trace;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

pub use self::request_id::RequestIdStage;
pub use self::trace::TracingStage;

use super::auth::AuthGatekeeper;
use super::context::RequestContext;
use super::error::InvocationError;
use super::rate_limit::RateLimiter;
use super::registry::CapabilityDescriptor;

pub type StageResult = Result<Value, InvocationError>;

/// Everything a stage may read about the call being made
pub struct Invocation {
    pub descriptor: Arc<CapabilityDescriptor>,
    pub arguments: Value,
    /// Raw credential as presented by the caller
    pub credential: Option<String>,
    /// Request id supplied by the client, kept for correlation only
    pub client_request_id: Option<String>,
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &mut RequestContext, invocation: &Invocation, next: Next<'_>) -> StageResult;
}

/// The innermost step, run after every stage has passed.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, ctx: &mut RequestContext, invocation: &Invocation) -> StageResult;
}

/// The remainder of the chain, handed to each stage.
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub async fn run(self, ctx: &mut RequestContext, invocation: &Invocation) -> StageResult {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    endpoint: self.endpoint,
                };
                stage.handle(ctx, invocation, next).await
            }
            None => self.endpoint.call(ctx, invocation).await,
        }
    }
}

/// Ordered stage list, fixed at construction.
#[derive(Clone)]
pub struct MiddlewareChain {
    stages: Vec<Arc<dyn Stage>>,
}

impl MiddlewareChain {
    pub fn new(stages: Vec<Arc<dyn Stage>>) -> Self {
        Self { stages }
    }

    /// RequestId, Auth, RateLimit (when enabled), Tracing.
    ///
    /// Error normalization is not a stage. `Dispatcher::finish` normalizes
    /// whatever the chain returns, together with the failures raised before
    /// the chain runs (not ready, unknown capability, invalid arguments).
    pub fn standard(gatekeeper: Arc<AuthGatekeeper>, rate_limiter: Option<Arc<RateLimiter>>) -> Self {
        let mut stages: Vec<Arc<dyn Stage>> = Vec::with_capacity(4);
        stages.push(Arc::new(RequestIdStage));
        stages.push(gatekeeper);
        if let Some(limiter) = rate_limiter {
            stages.push(limiter);
        }
        stages.push(Arc::new(TracingStage));
        Self::new(stages)
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn run(&self, ctx: &mut RequestContext, invocation: &Invocation, endpoint: &dyn Endpoint) -> StageResult {
        Next {
            stages: &self.stages,
            endpoint,
        }
        .run(ctx, invocation)
        .await
    }
}
