//! MCP (Model Context Protocol) Server
//!
//! Exposes named tools and URI-addressed resources to remote callers.
//! Every invocation is resolved by the registry, schema-checked, then run
//! through the middleware chain (request id, auth, rate limit, tracing)
//! with the handler at its center.
//!
//! ## Architecture
//!
//! - Transport: HTTP, `/v1/invoke` and JSON-RPC at `/v1/mcp`
//! - Auth: bearer credentials checked by a pluggable verifier
//! - Tools: schema-validated, optionally scope-gated
//! - Resources: read-only data addressed by URI

pub mod auth;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod resources;
pub mod result;
pub mod service;
pub mod status;
pub mod tools;

pub use dispatcher::{DispatchRequest, Dispatcher};
pub use error::{ErrorCode, ErrorPayload, InvocationError};
pub use protocol::{McpError, McpRequest, McpResponse};
pub use registry::{CapabilityBuilder, CapabilityRegistry};
pub use result::InvocationResult;
