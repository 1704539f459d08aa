use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use crate::mcp::service::McpService;

use super::ServerConfig;

pub type GuardedMcpService = Arc<McpService>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub service: GuardedMcpService,
    /// `<version>-<git hash>`
    pub version: String,
}

impl FromRef<ServerState> for GuardedMcpService {
    fn from_ref(input: &ServerState) -> Self {
        input.service.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
