use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::mcp::auth::StaticGrant;
use crate::mcp::rate_limit::KeyPolicy;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub port: Option<u16>,
    pub logging_level: Option<String>,
    pub metrics_enabled: Option<bool>,
    pub default_timeout_ms: Option<u64>,
    pub allow_hot_registration: Option<bool>,
    pub status_privileged_scope: Option<String>,

    // Feature configs
    pub rate_limit: Option<RateLimitFileConfig>,
    pub auth: Option<AuthFileConfig>,
    pub capabilities: HashMap<String, CapabilityFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RateLimitFileConfig {
    pub enabled: Option<bool>,
    pub requests_per_window: Option<u32>,
    pub window_secs: Option<u64>,
    pub policy: Option<KeyPolicy>,
    pub idle_eviction_secs: Option<u64>,
    pub cleanup_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AuthFileConfig {
    /// "none", "static", "jwt" or "introspection"
    pub mode: Option<String>,
    pub tokens: Vec<StaticGrant>,
    pub jwt_secret: Option<String>,
    pub jwt_issuer: Option<String>,
    pub jwt_audience: Option<String>,
    pub introspection_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub cache_size: Option<usize>,
}

/// Per-capability overrides, keyed by capability name
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CapabilityFileConfig {
    pub timeout_ms: Option<u64>,
    pub required_scopes: Option<Vec<String>>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
