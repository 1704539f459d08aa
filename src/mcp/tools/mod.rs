//! Built-in Tools

pub mod calculator;
pub mod echo;

use super::registry::{CapabilityRegistry, RegistryError};

/// Register all tools with the registry
pub fn register_all_tools(registry: &CapabilityRegistry) -> Result<(), RegistryError> {
    echo::register_tools(registry)?;
    calculator::register_tools(registry)?;
    Ok(())
}
