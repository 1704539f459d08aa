//! MCP Dispatch Server Library
//!
//! Exposes the internal modules for the binary and the end-to-end tests.

pub mod config;
pub mod mcp;
pub mod server;

pub use mcp::service::McpService;
pub use server::{run_server, RequestsLoggingLevel, ServerConfig};

/// `<crate version>-<git short hash>`
pub fn version_string() -> String {
    format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"))
}
