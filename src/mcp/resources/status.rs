use std::sync::Arc;

use serde_json::Value;

use crate::mcp::context::HandlerContext;
use crate::mcp::registry::{CapabilityBuilder, CapabilityRegistry, HandlerResult, RegistryError};
use crate::mcp::status::StatusReporter;

pub const STATUS_URI: &str = "status://server";

/// Public status resource. Callers holding `privileged_scope` see cleartext
/// rate limit identities.
pub fn register_resources(
    registry: &CapabilityRegistry,
    status: Arc<StatusReporter>,
    privileged_scope: &str,
) -> Result<(), RegistryError> {
    let privileged_scope = privileged_scope.to_string();
    let resource = CapabilityBuilder::resource(STATUS_URI, "server_status")
        .description("Capability counts, uptime, health and rate limit usage")
        .build(move |ctx: HandlerContext, _params: Value| {
            let status = status.clone();
            let privileged = ctx.has_scope(&privileged_scope);
            async move { read_status(&status, privileged) }
        })?;
    registry.register(resource)
}

fn read_status(status: &StatusReporter, privileged: bool) -> HandlerResult {
    Ok(serde_json::to_value(status.report(privileged))?)
}
