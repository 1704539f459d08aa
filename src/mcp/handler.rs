//! MCP JSON-RPC Handler
//!
//! Serves JSON-RPC 2.0 over `POST /v1/mcp`. Each HTTP request carries one
//! message; `tools/call` and `resources/read` go through the dispatcher so
//! they get the same middleware chain as `/v1/invoke`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use super::dispatcher::DispatchRequest;
use super::protocol::{
    methods, InitializeResult, McpError, McpRequest, McpResponse, PingResult, ResourceContent,
    ResourceDefinition, ResourcesCapability, ResourcesListResult, ResourcesReadParams,
    ResourcesReadResult, ServerCapabilities, ServerInfo, ToolDefinition, ToolsCallParams,
    ToolsCallResult, ToolsCapability, ToolsListResult, JSONRPC_VERSION, MCP_PROTOCOL_VERSION,
};
use super::registry::CapabilityKind;
use super::result::InvocationResult;
use super::service::McpService;
use crate::server::credential::BearerCredential;
use crate::server::state::ServerState;

/// `POST /v1/mcp`
pub async fn mcp_handler(
    State(state): State<ServerState>,
    BearerCredential(credential): BearerCredential,
    body: String,
) -> Response {
    match handle_message(&body, &state.service, credential.as_deref(), &state.version).await {
        Some(response) => Json(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// Handle a single MCP message. Notifications get no response.
pub async fn handle_message(
    text: &str,
    service: &McpService,
    credential: Option<&str>,
    version: &str,
) -> Option<McpResponse> {
    let request: McpRequest = match serde_json::from_str(text) {
        Ok(req) => req,
        Err(e) => return Some(McpResponse::error(None, McpError::ParseError(e.to_string()))),
    };

    if request.jsonrpc != JSONRPC_VERSION {
        return Some(McpResponse::error(
            request.id,
            McpError::InvalidRequest(format!("unsupported jsonrpc version {}", request.jsonrpc)),
        ));
    }

    let Some(request_id) = request.id.clone() else {
        debug!("MCP notification {}", request.method);
        return None;
    };

    let result = match request.method.as_str() {
        methods::INITIALIZE => handle_initialize(version),
        methods::INITIALIZED => return None,
        methods::PING => to_value(PingResult {}),
        methods::TOOLS_LIST => handle_tools_list(service),
        methods::TOOLS_CALL => handle_tools_call(&request, service, credential).await,
        methods::RESOURCES_LIST => handle_resources_list(service),
        methods::RESOURCES_READ => handle_resources_read(&request, service, credential).await,
        other => Err(McpError::MethodNotFound(other.to_string())),
    };

    Some(match result {
        Ok(value) => McpResponse::success(Some(request_id), value),
        Err(error) => McpResponse::error(Some(request_id), error),
    })
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, McpError> {
    serde_json::to_value(value).map_err(|e| McpError::InternalError(e.to_string()))
}

fn params<T: DeserializeOwned>(request: &McpRequest) -> Result<T, McpError> {
    request
        .params
        .clone()
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| McpError::InvalidParams(e.to_string()))?
        .ok_or_else(|| McpError::InvalidParams("Missing params".to_string()))
}

fn handle_initialize(version: &str) -> Result<Value, McpError> {
    to_value(InitializeResult {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: false }),
            resources: Some(ResourcesCapability {
                subscribe: false,
                list_changed: false,
            }),
        },
        server_info: ServerInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: version.to_string(),
        },
    })
}

fn handle_tools_list(service: &McpService) -> Result<Value, McpError> {
    let list = service.registry.list();
    let tools = list
        .descriptors()
        .iter()
        .filter(|d| d.kind == CapabilityKind::Tool)
        .map(|d| ToolDefinition {
            name: d.name.clone(),
            description: d.description.clone(),
            input_schema: d.input_schema.clone(),
        })
        .collect();
    to_value(ToolsListResult { tools })
}

fn handle_resources_list(service: &McpService) -> Result<Value, McpError> {
    let list = service.registry.list();
    let resources = list
        .descriptors()
        .iter()
        .filter(|d| d.kind == CapabilityKind::Resource)
        .filter_map(|d| {
            Some(ResourceDefinition {
                uri: d.uri.clone()?,
                name: d.name.clone(),
                description: (!d.description.is_empty()).then(|| d.description.clone()),
                mime_type: d.mime_type.clone(),
            })
        })
        .collect();
    to_value(ResourcesListResult { resources })
}

async fn handle_tools_call(
    request: &McpRequest,
    service: &McpService,
    credential: Option<&str>,
) -> Result<Value, McpError> {
    let params: ToolsCallParams = params(request)?;

    if let Ok(descriptor) = service.registry.lookup(&params.name) {
        if descriptor.kind != CapabilityKind::Tool {
            return Err(McpError::InvalidParams(format!("{} is not a tool", params.name)));
        }
    }

    let dispatch = DispatchRequest::new(params.name, params.arguments.unwrap_or_else(|| json!({})))
        .with_credential(credential.map(str::to_string));
    match service.dispatcher.dispatch_request(dispatch).await.result {
        InvocationResult::Success(value) => {
            to_value(ToolsCallResult::json(value).map_err(|e| McpError::InternalError(e.to_string()))?)
        }
        InvocationResult::Failure(payload) => Err(McpError::Invocation(payload)),
    }
}

async fn handle_resources_read(
    request: &McpRequest,
    service: &McpService,
    credential: Option<&str>,
) -> Result<Value, McpError> {
    let params: ResourcesReadParams = params(request)?;
    let mime_type = service
        .registry
        .find_resource(&params.uri)
        .and_then(|d| d.mime_type.clone());

    let dispatch = DispatchRequest::new(params.uri.clone(), json!({ "uri": params.uri }))
        .with_credential(credential.map(str::to_string));
    match service.dispatcher.dispatch_request(dispatch).await.result {
        InvocationResult::Success(value) => {
            let text = serde_json::to_string_pretty(&value).map_err(|e| McpError::InternalError(e.to_string()))?;
            to_value(ResourcesReadResult {
                contents: vec![ResourceContent {
                    uri: params.uri,
                    mime_type,
                    text,
                }],
            })
        }
        InvocationResult::Failure(payload) => Err(McpError::Invocation(payload)),
    }
}
