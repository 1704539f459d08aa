//! Invocation, listing and status routes under `/v1`

use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::credential::BearerCredential;
use super::state::{GuardedMcpService, ServerState};
use crate::mcp::context::{new_request_id, RequestContext};
use crate::mcp::dispatcher::DispatchRequest;
use crate::mcp::error::{retry_after_secs, ErrorCode, ErrorNormalizer, InvocationError};
use crate::mcp::rate_limit::Quota;
use crate::mcp::result::{InvocationResponse, InvocationResult};

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
pub const RATE_LIMIT_LIMIT_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Unix time, in seconds, when the current window resets
pub const RATE_LIMIT_RESET_HEADER: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Deserialize, Debug)]
struct InvokeBody {
    capability: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    credential: Option<String>,
}

/// HTTP status mirroring an invocation error code
pub fn status_code_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn insert_quota_headers(headers: &mut HeaderMap, quota: &Quota) {
    let reset_at = chrono::Utc::now()
        .timestamp()
        .saturating_add(i64::try_from(retry_after_secs(quota.reset_after)).unwrap_or(i64::MAX));
    headers.insert(RATE_LIMIT_LIMIT_HEADER, HeaderValue::from(quota.limit));
    headers.insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(quota.remaining));
    headers.insert(RATE_LIMIT_RESET_HEADER, HeaderValue::from(reset_at));
}

fn invocation_response(request_id: &str, result: InvocationResult, quota: Option<Quota>) -> Response {
    let status = match &result {
        InvocationResult::Success(_) => StatusCode::OK,
        InvocationResult::Failure(payload) => status_code_for(payload.code),
    };
    let retry_after = result
        .error()
        .filter(|payload| payload.code == ErrorCode::RateLimited)
        .and_then(|payload| payload.details.get("retryAfter"))
        .and_then(Value::as_u64);

    let mut response = (status, Json(InvocationResponse::from(result))).into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, value);
    }
    if let Some(secs) = retry_after {
        headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
    }
    if let Some(quota) = &quota {
        insert_quota_headers(headers, quota);
    }
    response
}

async fn invoke(
    State(service): State<GuardedMcpService>,
    BearerCredential(header_credential): BearerCredential,
    headers: HeaderMap,
    body: Result<Json<InvokeBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            // Never reached the dispatcher, normalize it here with a fresh id.
            let mut ctx = RequestContext::new(new_request_id(), "", Duration::ZERO);
            let error = InvocationError::invalid("/", rejection.body_text());
            let payload = ErrorNormalizer.normalize(&error, &mut ctx);
            debug!("Rejected invocation body: {}", rejection.body_text());
            return invocation_response(&ctx.request_id, InvocationResult::Failure(payload), None);
        }
    };

    let client_request_id = headers
        .get(&REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request = DispatchRequest {
        capability: body.capability,
        arguments: body.arguments,
        credential: body.credential.or(header_credential),
        client_request_id,
    };
    let dispatched = service.dispatcher.dispatch_request(request).await;
    invocation_response(&dispatched.request_id, dispatched.result, dispatched.quota)
}

async fn list_capabilities(State(service): State<GuardedMcpService>) -> impl IntoResponse {
    let list = service.registry.list();
    let capabilities: Vec<_> = list.iter().collect();
    Json(json!({ "capabilities": capabilities }))
}

async fn get_status(
    State(service): State<GuardedMcpService>,
    BearerCredential(credential): BearerCredential,
) -> impl IntoResponse {
    Json(service.status_for(credential.as_deref()).await)
}

pub fn make_invoke_routes(state: ServerState) -> Router {
    Router::new()
        .route("/invoke", post(invoke))
        .route("/capabilities", get(list_capabilities))
        .route("/status", get(get_status))
        .with_state(state)
}
