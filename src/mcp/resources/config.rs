use serde_json::Value;

use crate::mcp::registry::{CapabilityBuilder, CapabilityRegistry, RegistryError};

pub const CONFIG_URI: &str = "config://settings";

/// Admin-only view of the effective configuration. The value is already
/// stripped of secrets when it gets here.
pub fn register_resources(registry: &CapabilityRegistry, sanitized_config: Value) -> Result<(), RegistryError> {
    let resource = CapabilityBuilder::resource(CONFIG_URI, "server_config")
        .description("Effective server configuration with secrets redacted")
        .scope("admin")
        .build(move |_ctx, _params| {
            let config = sanitized_config.clone();
            async move { Ok(config) }
        })?;
    registry.register(resource)
}
