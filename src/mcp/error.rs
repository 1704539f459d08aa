//! Invocation Error Taxonomy
//!
//! Every failure an invocation can end with is one of the kinds below. The
//! [`ErrorNormalizer`] turns them into the stable `(code, message, details)`
//! triple that callers see; internal detail only ever lands in the request's
//! trace fields.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use super::context::RequestContext;

/// Stable, externally visible error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    RateLimited,
    Timeout,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "ValidationError",
            ErrorCode::NotFound => "NotFound",
            ErrorCode::Unauthorized => "Unauthorized",
            ErrorCode::Forbidden => "Forbidden",
            ErrorCode::RateLimited => "RateLimited",
            ErrorCode::Timeout => "Timeout",
            ErrorCode::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One argument field that failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    /// JSON pointer to the offending field ("/" for the arguments object itself)
    pub field: String,
    pub reason: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Internal failure kinds. Carries enough detail for logging; never sent to
/// the caller as-is.
#[derive(Debug, Clone, Error)]
pub enum InvocationError {
    #[error("Invalid arguments: {} field(s) failed validation", .0.len())]
    Validation(Vec<FieldViolation>),

    #[error("Capability not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Missing required scopes: {missing:?}")]
    Forbidden { missing: Vec<String> },

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Deadline of {budget:?} exceeded")]
    Timeout { budget: Duration },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InvocationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            InvocationError::Validation(_) => ErrorCode::ValidationError,
            InvocationError::NotFound(_) => ErrorCode::NotFound,
            InvocationError::Unauthorized(_) => ErrorCode::Unauthorized,
            InvocationError::Forbidden { .. } => ErrorCode::Forbidden,
            InvocationError::RateLimited { .. } => ErrorCode::RateLimited,
            InvocationError::Timeout { .. } => ErrorCode::Timeout,
            InvocationError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Shorthand for a single-field validation failure raised by a handler.
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        InvocationError::Validation(vec![FieldViolation::new(field, reason)])
    }

    pub fn internal(detail: impl fmt::Display) -> Self {
        InvocationError::Internal(detail.to_string())
    }
}

impl From<anyhow::Error> for InvocationError {
    fn from(err: anyhow::Error) -> Self {
        InvocationError::Internal(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for InvocationError {
    fn from(err: serde_json::Error) -> Self {
        InvocationError::invalid("/", err.to_string())
    }
}

/// The externally visible error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
}

/// Seconds until retry, rounded up and never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after
        .as_secs()
        .saturating_add(u64::from(retry_after.subsec_nanos() > 0));
    secs.max(1)
}

/// Maps internal failures to [`ErrorPayload`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorNormalizer;

impl ErrorNormalizer {
    pub fn normalize(&self, error: &InvocationError, ctx: &mut RequestContext) -> ErrorPayload {
        ctx.record("error.code", error.code().as_str());

        let (message, details) = match error {
            InvocationError::Validation(fields) => (
                "Arguments do not match the input schema".to_string(),
                json!({ "fields": fields }),
            ),
            InvocationError::NotFound(name) => (
                format!("Unknown capability: {}", name),
                json!({ "capability": name }),
            ),
            InvocationError::Unauthorized(reason) => {
                ctx.record("error.detail", reason.as_str());
                ("Authentication required".to_string(), json!({}))
            }
            InvocationError::Forbidden { missing } => (
                "Credential lacks a required scope".to_string(),
                json!({ "missingScopes": missing }),
            ),
            InvocationError::RateLimited { retry_after } => {
                let secs = retry_after_secs(*retry_after);
                (
                    format!("Rate limit exceeded, retry after {} seconds", secs),
                    json!({ "retryAfter": secs }),
                )
            }
            InvocationError::Timeout { budget } => (
                "Invocation exceeded its deadline".to_string(),
                json!({ "timeoutMs": budget.as_millis() as u64 }),
            ),
            InvocationError::Internal(detail) => {
                ctx.record("error.detail", detail.as_str());
                (
                    "Internal error".to_string(),
                    json!({ "requestId": ctx.request_id }),
                )
            }
        };

        ErrorPayload {
            code: error.code(),
            message,
            details,
        }
    }
}
