//! Built-in Resources

pub mod config;
pub mod logs;
pub mod status;

pub use logs::{RecentLogs, RecentLogsLayer};

use std::sync::Arc;

use serde_json::Value;

use super::registry::{CapabilityRegistry, RegistryError};
use super::status::StatusReporter;

/// Register all resources with the registry
pub fn register_all_resources(
    registry: &CapabilityRegistry,
    status: Arc<StatusReporter>,
    privileged_scope: &str,
    sanitized_config: Value,
    recent_logs: RecentLogs,
) -> Result<(), RegistryError> {
    status::register_resources(registry, status, privileged_scope)?;
    config::register_resources(registry, sanitized_config)?;
    logs::register_resources(registry, recent_logs)?;
    Ok(())
}
