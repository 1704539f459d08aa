use serde::Deserialize;
use serde_json::{json, Value};

use crate::mcp::context::HandlerContext;
use crate::mcp::registry::{
    CapabilityBuilder, CapabilityDescriptor, CapabilityRegistry, HandlerResult, RegistryError,
};

pub fn register_tools(registry: &CapabilityRegistry) -> Result<(), RegistryError> {
    registry.register(echo_tool()?)
}

#[derive(Debug, Deserialize)]
struct EchoParams {
    text: String,
}

fn echo_tool() -> Result<CapabilityDescriptor, RegistryError> {
    CapabilityBuilder::tool("echo")
        .description("Return the given text unchanged")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text to echo back"
                }
            },
            "required": ["text"]
        }))
        .output_schema(json!({
            "type": "object",
            "properties": {
                "text": { "type": "string" }
            },
            "required": ["text"]
        }))
        .build(echo_handler)
}

async fn echo_handler(_ctx: HandlerContext, params: Value) -> HandlerResult {
    let params: EchoParams = serde_json::from_value(params)?;
    Ok(json!({ "text": params.text }))
}
