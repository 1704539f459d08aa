//! Calculator Tool
//!
//! Two-operand arithmetic. Division and modulo by zero, or results that do
//! not fit a finite float, are argument errors.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::mcp::context::HandlerContext;
use crate::mcp::error::InvocationError;
use crate::mcp::registry::{
    CapabilityBuilder, CapabilityDescriptor, CapabilityRegistry, HandlerResult, RegistryError,
};

pub fn register_tools(registry: &CapabilityRegistry) -> Result<(), RegistryError> {
    registry.register(calculate_tool()?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Modulo,
}

#[derive(Debug, Deserialize)]
struct CalculateParams {
    operation: Operation,
    a: f64,
    b: f64,
}

#[derive(Debug, Serialize)]
struct CalculateResult {
    operation: Operation,
    a: f64,
    b: f64,
    result: f64,
}

fn calculate_tool() -> Result<CapabilityDescriptor, RegistryError> {
    CapabilityBuilder::tool("calculate")
        .description("Perform a basic arithmetic operation on two numbers")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "operation": {
                    "type": "string",
                    "enum": ["add", "subtract", "multiply", "divide", "power", "modulo"],
                    "description": "Operation to perform"
                },
                "a": { "type": "number", "description": "First operand" },
                "b": { "type": "number", "description": "Second operand" }
            },
            "required": ["operation", "a", "b"]
        }))
        .output_schema(json!({
            "type": "object",
            "properties": {
                "operation": { "type": "string" },
                "a": { "type": "number" },
                "b": { "type": "number" },
                "result": { "type": "number" }
            },
            "required": ["operation", "a", "b", "result"]
        }))
        .build(calculate_handler)
}

fn apply(operation: Operation, a: f64, b: f64) -> Result<f64, InvocationError> {
    let result = match operation {
        Operation::Add => a + b,
        Operation::Subtract => a - b,
        Operation::Multiply => a * b,
        Operation::Divide | Operation::Modulo if b == 0.0 => {
            return Err(InvocationError::invalid("/b", "division by zero"));
        }
        Operation::Divide => a / b,
        Operation::Power => a.powf(b),
        // Floored modulo: the result takes the sign of the divisor.
        Operation::Modulo => ((a % b) + b) % b,
    };

    if !result.is_finite() {
        return Err(InvocationError::invalid("/", "result is not a finite number"));
    }
    Ok(result)
}

async fn calculate_handler(_ctx: HandlerContext, params: Value) -> HandlerResult {
    let params: CalculateParams = serde_json::from_value(params)?;
    let result = apply(params.operation, params.a, params.b)?;
    Ok(serde_json::to_value(CalculateResult {
        operation: params.operation,
        a: params.a,
        b: params.b,
        result,
    })?)
}
