use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ErrorPayload;

/// Final outcome of one invocation
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationResult {
    Success(Value),
    Failure(ErrorPayload),
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, InvocationResult::Success(_))
    }

    pub fn error(&self) -> Option<&ErrorPayload> {
        match self {
            InvocationResult::Success(_) => None,
            InvocationResult::Failure(payload) => Some(payload),
        }
    }

    /// "Success" or the error code, for logs and metric labels
    pub fn code_label(&self) -> &'static str {
        match self {
            InvocationResult::Success(_) => "Success",
            InvocationResult::Failure(payload) => payload.code.as_str(),
        }
    }
}

/// Wire shape: `{ success: true, result }` or `{ success: false, error }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl From<InvocationResult> for InvocationResponse {
    fn from(result: InvocationResult) -> Self {
        match result {
            InvocationResult::Success(value) => Self {
                success: true,
                result: Some(value),
                error: None,
            },
            InvocationResult::Failure(payload) => Self {
                success: false,
                result: None,
                error: Some(payload),
            },
        }
    }
}
