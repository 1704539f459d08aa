//! Invocation Dispatcher
//!
//! Resolves the capability, validates arguments, builds the request context
//! and drives the middleware chain with the handler at its center. Every
//! outcome leaves here as an [`InvocationResult`].

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinError;
use tracing::{debug, warn};

use super::context::{new_request_id, RequestContext};
use super::error::{ErrorCode, ErrorNormalizer, InvocationError};
use super::middleware::{Endpoint, Invocation, MiddlewareChain, StageResult};
use super::rate_limit::Quota;
use super::registry::CapabilityRegistry;
use super::result::InvocationResult;
use super::service::HealthSignal;
use crate::server::metrics;

/// Extra time the whole chain gets past the handler deadline before the
/// dispatcher gives up on it.
pub const DEFAULT_DEADLINE_GRACE: Duration = Duration::from_millis(250);

/// One call as received from a transport
#[derive(Debug, Clone, Default)]
pub struct DispatchRequest {
    pub capability: String,
    pub arguments: Value,
    pub credential: Option<String>,
    pub client_request_id: Option<String>,
}

impl DispatchRequest {
    pub fn new(capability: impl Into<String>, arguments: Value) -> Self {
        Self {
            capability: capability.into(),
            arguments,
            ..Default::default()
        }
    }

    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential;
        self
    }
}

/// A result plus the id it was served under
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub request_id: String,
    pub result: InvocationResult,
    /// Rate limit standing, when the call reached the limiter
    pub quota: Option<Quota>,
}

pub struct Dispatcher {
    registry: Arc<CapabilityRegistry>,
    chain: MiddlewareChain,
    health: HealthSignal,
    normalizer: ErrorNormalizer,
    grace: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<CapabilityRegistry>, chain: MiddlewareChain, health: HealthSignal) -> Self {
        Self {
            registry,
            chain,
            health,
            normalizer: ErrorNormalizer,
            grace: DEFAULT_DEADLINE_GRACE,
        }
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn registry(&self) -> &Arc<CapabilityRegistry> {
        &self.registry
    }

    pub async fn dispatch(&self, name: &str, arguments: Value, credential: Option<&str>) -> InvocationResult {
        let request = DispatchRequest::new(name, arguments).with_credential(credential.map(str::to_string));
        self.dispatch_request(request).await.result
    }

    pub async fn dispatch_request(&self, request: DispatchRequest) -> Dispatched {
        let request_id = new_request_id();
        let (ctx, outcome) = self.run(request_id.clone(), request).await;
        let quota = ctx.quota;
        Dispatched {
            request_id,
            result: self.finish(ctx, outcome),
            quota,
        }
    }

    async fn run(&self, request_id: String, request: DispatchRequest) -> (RequestContext, StageResult) {
        if !self.health.is_ready() {
            let ctx = RequestContext::new(request_id, request.capability, Duration::ZERO);
            return (ctx, Err(InvocationError::internal("server is not accepting invocations")));
        }

        let descriptor = match self.registry.resolve(&request.capability) {
            Ok(descriptor) => descriptor,
            Err(_) => {
                let ctx = RequestContext::new(request_id, request.capability.clone(), Duration::ZERO);
                return (ctx, Err(InvocationError::NotFound(request.capability)));
            }
        };

        let mut ctx = RequestContext::new(request_id, descriptor.name.clone(), descriptor.timeout());

        let arguments = match request.arguments {
            Value::Null => json!({}),
            other => other,
        };
        if let Err(fields) = descriptor.validate_arguments(&arguments) {
            return (ctx, Err(InvocationError::Validation(fields)));
        }

        let invocation = Invocation {
            descriptor,
            arguments,
            credential: request.credential,
            client_request_id: request.client_request_id,
        };

        let hard_deadline = ctx.deadline.checked_add(self.grace).unwrap_or(ctx.deadline);
        let budget = ctx.budget();
        let outcome = match tokio::time::timeout_at(hard_deadline, self.chain.run(&mut ctx, &invocation, &HandlerEndpoint)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    "Invocation {} of {} did not finish within deadline plus grace",
                    ctx.request_id, ctx.capability
                );
                ctx.cancel();
                Err(InvocationError::Timeout { budget })
            }
        };
        (ctx, outcome)
    }

    fn finish(&self, mut ctx: RequestContext, outcome: StageResult) -> InvocationResult {
        let result = match outcome {
            Ok(value) => InvocationResult::Success(value),
            Err(err) => InvocationResult::Failure(self.normalizer.normalize(&err, &mut ctx)),
        };
        let code = result.code_label();
        // Unknown names are caller-controlled, keep them out of metric labels.
        let label = match &result {
            InvocationResult::Failure(payload) if payload.code == ErrorCode::NotFound => "unknown",
            _ => ctx.capability.as_str(),
        };
        metrics::record_invocation(label, code, ctx.elapsed());
        debug!(
            request_id = %ctx.request_id,
            capability = %ctx.capability,
            identity = %ctx.identity,
            outcome = code,
            fields = ?ctx.trace_fields,
            "Dispatch finished"
        );
        result
    }
}

/// Runs the capability handler on its own task under the context deadline.
struct HandlerEndpoint;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn join_failure(err: JoinError) -> InvocationError {
    if err.is_panic() {
        let payload = err.into_panic();
        InvocationError::Internal(format!("handler panicked: {}", panic_message(payload.as_ref())))
    } else {
        InvocationError::internal("handler task was cancelled")
    }
}

#[async_trait]
impl Endpoint for HandlerEndpoint {
    async fn call(&self, ctx: &mut RequestContext, invocation: &Invocation) -> StageResult {
        let descriptor = &invocation.descriptor;
        if ctx.remaining().is_zero() {
            ctx.cancel();
            return Err(InvocationError::Timeout { budget: ctx.budget() });
        }

        // Cancel whatever the handler is doing if this future is dropped
        // (outer grace timeout) or the handler is abandoned.
        let _cancel_on_exit = ctx.cancellation_token().clone().drop_guard();

        let handler = descriptor.handler().clone();
        let handler_ctx = ctx.handler_context();
        let arguments = invocation.arguments.clone();
        let mut task = tokio::spawn(async move { handler(handler_ctx, arguments).await });

        match tokio::time::timeout_at(ctx.deadline, &mut task).await {
            Ok(Ok(Ok(value))) => match descriptor.validate_output(&value) {
                Ok(()) => Ok(value),
                Err(fields) => {
                    let detail = fields
                        .iter()
                        .map(|f| format!("{}: {}", f.field, f.reason))
                        .collect::<Vec<_>>()
                        .join("; ");
                    Err(InvocationError::Internal(format!(
                        "handler output violates its schema: {}",
                        detail
                    )))
                }
            },
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(join_err)) => Err(join_failure(join_err)),
            Err(_) => {
                // The task is left to observe cancellation on its own; its
                // result is never awaited.
                ctx.cancel();
                ctx.record("timed_out", "true");
                Err(InvocationError::Timeout { budget: ctx.budget() })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::auth::{AuthGatekeeper, StaticGrant, StaticTokenVerifier};
    use crate::mcp::rate_limit::{KeyPolicy, RateLimitConfig, RateLimiter};
    use crate::mcp::registry::CapabilityBuilder;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Fixture {
        registry: Arc<CapabilityRegistry>,
        health: HealthSignal,
        dispatcher: Dispatcher,
    }

    fn fixture(limit: u32) -> Fixture {
        let registry = Arc::new(CapabilityRegistry::new());
        let verifier = StaticTokenVerifier::new([
            StaticGrant::new("u1-token", "u1", ["read"]),
            StaticGrant::new("admin-token", "admin-user", ["admin"]),
        ]);
        let gatekeeper = Arc::new(AuthGatekeeper::new(Arc::new(verifier), 16));
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            requests_per_window: limit,
            window: Duration::from_secs(60),
            policy: KeyPolicy::PerCapability,
        }));
        let health = HealthSignal::new();
        health.set_ready(true);
        let dispatcher = Dispatcher::new(
            registry.clone(),
            MiddlewareChain::standard(gatekeeper, Some(limiter)),
            health.clone(),
        );
        Fixture {
            registry,
            health,
            dispatcher,
        }
    }

    fn register_echo(registry: &CapabilityRegistry) {
        let echo = CapabilityBuilder::tool("echo")
            .input_schema(json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }))
            .output_schema(json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }))
            .build(|_ctx, args| async move { Ok(json!({ "text": args["text"] })) })
            .unwrap();
        registry.register(echo).unwrap();
    }

    fn failure_code(result: &InvocationResult) -> Option<ErrorCode> {
        match result {
            InvocationResult::Failure(payload) => Some(payload.code),
            InvocationResult::Success(_) => None,
        }
    }

    #[tokio::test]
    async fn test_public_echo() {
        let f = fixture(60);
        register_echo(&f.registry);

        let result = f.dispatcher.dispatch("echo", json!({ "text": "hi" }), None).await;
        assert_eq!(result, InvocationResult::Success(json!({ "text": "hi" })));
    }

    #[tokio::test]
    async fn test_unknown_capability_is_not_found() {
        let f = fixture(60);
        let result = f.dispatcher.dispatch("missing", json!({}), None).await;
        assert_eq!(failure_code(&result), Some(ErrorCode::NotFound));
    }

    #[tokio::test]
    async fn test_invalid_arguments_never_reach_handler() {
        let f = fixture(60);
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let tool = CapabilityBuilder::tool("strict")
            .input_schema(json!({
                "type": "object",
                "properties": { "n": { "type": "integer" } },
                "required": ["n"]
            }))
            .build(move |_ctx, _args| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok(json!({}))
                }
            })
            .unwrap();
        f.registry.register(tool).unwrap();

        let result = f.dispatcher.dispatch("strict", json!({ "n": "one" }), None).await;
        match result {
            InvocationResult::Failure(payload) => {
                assert_eq!(payload.code, ErrorCode::ValidationError);
                assert_eq!(payload.details["fields"][0]["field"], "/n");
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_admin_reset_requires_scope() {
        let f = fixture(60);
        let reset = CapabilityBuilder::tool("admin-reset")
            .scope("admin")
            .build(|ctx, _args| async move { Ok(json!({ "resetBy": ctx.identity.to_string() })) })
            .unwrap();
        f.registry.register(reset).unwrap();

        let anonymous = f.dispatcher.dispatch("admin-reset", json!({}), None).await;
        assert_eq!(failure_code(&anonymous), Some(ErrorCode::Unauthorized));

        let reader = f.dispatcher.dispatch("admin-reset", json!({}), Some("u1-token")).await;
        assert_eq!(failure_code(&reader), Some(ErrorCode::Forbidden));

        let admin = f.dispatcher.dispatch("admin-reset", json!({}), Some("admin-token")).await;
        assert_eq!(admin, InvocationResult::Success(json!({ "resetBy": "admin-user" })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_window_reset() {
        let f = fixture(60);
        let search = CapabilityBuilder::tool("search")
            .build(|_ctx, _args| async move { Ok(json!({ "hits": [] })) })
            .unwrap();
        f.registry.register(search).unwrap();

        for _ in 0..60 {
            let result = f.dispatcher.dispatch("search", json!({}), Some("u1-token")).await;
            assert!(result.is_success());
        }

        let limited = f.dispatcher.dispatch("search", json!({}), Some("u1-token")).await;
        match &limited {
            InvocationResult::Failure(payload) => {
                assert_eq!(payload.code, ErrorCode::RateLimited);
                let retry_after = payload.details["retryAfter"].as_u64().unwrap();
                assert!((1..=60).contains(&retry_after));
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }

        tokio::time::advance(Duration::from_secs(60)).await;
        let again = f.dispatcher.dispatch("search", json!({}), Some("u1-token")).await;
        assert!(again.is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_call_in_window_is_rate_limited() {
        let f = fixture(2);
        register_echo(&f.registry);
        let args = json!({ "text": "hi" });

        let first = f.dispatcher.dispatch("echo", args.clone(), Some("u1-token")).await;
        let second = f.dispatcher.dispatch("echo", args.clone(), Some("u1-token")).await;
        assert!(first.is_success());
        assert!(second.is_success());

        let third = f.dispatcher.dispatch("echo", args, Some("u1-token")).await;
        match third {
            InvocationResult::Failure(payload) => {
                assert_eq!(payload.code, ErrorCode::RateLimited);
                let retry_after = payload.details["retryAfter"].as_u64().unwrap();
                assert!(retry_after <= 60);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatched_carries_quota() {
        let f = fixture(2);
        register_echo(&f.registry);
        let request = || {
            DispatchRequest::new("echo", json!({ "text": "hi" })).with_credential(Some("u1-token".to_string()))
        };

        let first = f.dispatcher.dispatch_request(request()).await;
        let quota = first.quota.unwrap();
        assert_eq!((quota.limit, quota.remaining), (2, 1));

        f.dispatcher.dispatch_request(request()).await;
        let limited = f.dispatcher.dispatch_request(request()).await;
        assert_eq!(limited.quota.unwrap().remaining, 0);

        let unknown = f.dispatcher.dispatch_request(DispatchRequest::new("missing", json!({}))).await;
        assert!(unknown.quota.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handler_times_out_and_is_cancelled() {
        let f = fixture(60);
        let observed_cancel = Arc::new(AtomicBool::new(false));
        let flag = observed_cancel.clone();
        let slow = CapabilityBuilder::tool("slow")
            .timeout(Duration::from_millis(100))
            .build(move |ctx, _args| {
                let flag = flag.clone();
                async move {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(10)) => Ok(json!({})),
                        _ = ctx.cancelled() => {
                            flag.store(true, Ordering::SeqCst);
                            Err(InvocationError::internal("cancelled"))
                        }
                    }
                }
            })
            .unwrap();
        f.registry.register(slow).unwrap();

        let started = tokio::time::Instant::now();
        let result = f.dispatcher.dispatch("slow", json!({}), None).await;
        assert_eq!(failure_code(&result), Some(ErrorCode::Timeout));
        assert!(started.elapsed() <= Duration::from_millis(100) + DEFAULT_DEADLINE_GRACE);

        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert!(observed_cancel.load(Ordering::SeqCst));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handler_ignoring_cancellation_still_times_out() {
        let f = fixture(60);
        let blocking = CapabilityBuilder::tool("stubborn")
            .timeout(Duration::from_millis(50))
            .build(|_ctx, _args| async move {
                std::thread::sleep(Duration::from_millis(400));
                Ok(json!({}))
            })
            .unwrap();
        f.registry.register(blocking).unwrap();

        let started = std::time::Instant::now();
        let result = f.dispatcher.dispatch("stubborn", json!({}), None).await;
        assert_eq!(failure_code(&result), Some(ErrorCode::Timeout));
        assert!(started.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_internal_error() {
        let f = fixture(60);
        let boom = CapabilityBuilder::tool("boom")
            .build(|_ctx, _args| async move {
                if true {
                    panic!("secret internals");
                }
                Ok(json!({}))
            })
            .unwrap();
        f.registry.register(boom).unwrap();

        match f.dispatcher.dispatch("boom", json!({}), None).await {
            InvocationResult::Failure(payload) => {
                assert_eq!(payload.code, ErrorCode::InternalError);
                assert!(!payload.message.contains("secret"));
                assert!(!payload.details.to_string().contains("secret"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_error_kinds_pass_through() {
        let f = fixture(60);
        let picky = CapabilityBuilder::tool("picky")
            .build(|_ctx, _args| async move { Err(InvocationError::invalid("/x", "x must be even")) })
            .unwrap();
        f.registry.register(picky).unwrap();

        let result = f.dispatcher.dispatch("picky", json!({}), None).await;
        assert_eq!(failure_code(&result), Some(ErrorCode::ValidationError));
    }

    #[tokio::test]
    async fn test_output_schema_violation_is_internal() {
        let f = fixture(60);
        let liar = CapabilityBuilder::tool("liar")
            .output_schema(json!({ "type": "object", "required": ["answer"] }))
            .build(|_ctx, _args| async move { Ok(json!({ "wrong": 1 })) })
            .unwrap();
        f.registry.register(liar).unwrap();

        let result = f.dispatcher.dispatch("liar", json!({}), None).await;
        assert_eq!(failure_code(&result), Some(ErrorCode::InternalError));
    }

    #[tokio::test]
    async fn test_shutdown_fails_fast() {
        let f = fixture(60);
        register_echo(&f.registry);
        f.health.set_ready(false);

        let result = f.dispatcher.dispatch("echo", json!({ "text": "hi" }), None).await;
        assert_eq!(failure_code(&result), Some(ErrorCode::InternalError));
    }

    #[tokio::test]
    async fn test_null_arguments_are_an_empty_object() {
        let f = fixture(60);
        let noop = CapabilityBuilder::tool("noop")
            .build(|_ctx, args| async move { Ok(json!({ "args": args })) })
            .unwrap();
        f.registry.register(noop).unwrap();

        let result = f.dispatcher.dispatch("noop", Value::Null, None).await;
        assert_eq!(result, InvocationResult::Success(json!({ "args": {} })));
    }

    #[tokio::test]
    async fn test_request_ids_are_distinct() {
        let f = fixture(60);
        register_echo(&f.registry);
        let a = f.dispatcher.dispatch_request(DispatchRequest::new("echo", json!({ "text": "a" }))).await;
        let b = f.dispatcher.dispatch_request(DispatchRequest::new("echo", json!({ "text": "b" }))).await;
        assert_ne!(a.request_id, b.request_id);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_dispatches() {
        let f = fixture(1000);
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = counter.clone();
        let count = CapabilityBuilder::tool("count")
            .build(move |_ctx, _args| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({}))
                }
            })
            .unwrap();
        f.registry.register(count).unwrap();
        let dispatcher = Arc::new(f.dispatcher);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let dispatcher = dispatcher.clone();
            handles.push(tokio::spawn(async move {
                dispatcher.dispatch("count", json!({}), None).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_success());
        }
        assert_eq!(counter.load(Ordering::SeqCst), 50);
    }
}
