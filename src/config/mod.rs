mod file_config;

pub use file_config::{AuthFileConfig, CapabilityFileConfig, FileConfig, RateLimitFileConfig};

use crate::mcp::auth::StaticGrant;
use crate::mcp::context::MAX_BUDGET;
use crate::mcp::rate_limit::{KeyPolicy, RateLimitConfig};
use crate::mcp::registry::{CapabilityOverride, RegistrySettings};
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub metrics_enabled: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            logging_level: RequestsLoggingLevel::Path,
            metrics_enabled: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub metrics_enabled: bool,
    pub default_timeout: Duration,
    pub allow_hot_registration: bool,
    pub status_privileged_scope: String,

    // Feature configs (with defaults)
    pub rate_limit: RateLimitSettings,
    pub auth: AuthSettings,
    pub capabilities: HashMap<String, CapabilityOverride>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub requests_per_window: u32,
    pub window: Duration,
    pub policy: KeyPolicy,
    pub idle_eviction: Duration,
    pub cleanup_interval: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_window: 60,
            window: Duration::from_secs(60),
            policy: KeyPolicy::PerCapability,
            idle_eviction: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl RateLimitSettings {
    pub fn limiter_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            requests_per_window: self.requests_per_window,
            window: self.window,
            policy: self.policy,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthMode {
    None,
    Static {
        tokens: Vec<StaticGrant>,
    },
    Jwt {
        secret: String,
        issuer: Option<String>,
        audience: Option<String>,
    },
    Introspection {
        url: String,
        client_id: Option<String>,
        client_secret: Option<String>,
    },
}

impl AuthMode {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMode::None => "none",
            AuthMode::Static { .. } => "static",
            AuthMode::Jwt { .. } => "jwt",
            AuthMode::Introspection { .. } => "introspection",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuthSettings {
    pub mode: AuthMode,
    pub cache_size: usize,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            mode: AuthMode::None,
            cache_size: 1024,
        }
    }
}

const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PRIVILEGED_SCOPE: &str = "admin";
/// Upper bound for every rate limiter period (window, eviction, cleanup)
const MAX_PERIOD_SECS: u64 = 24 * 60 * 60;

fn check_timeout_ms(key: &str, timeout_ms: u64) -> Result<()> {
    if timeout_ms == 0 {
        bail!("{} must be greater than zero", key);
    }
    if u128::from(timeout_ms) > MAX_BUDGET.as_millis() {
        bail!("{} must be at most {} ms", key, MAX_BUDGET.as_millis());
    }
    Ok(())
}

fn check_period_secs(key: &str, period: Duration) -> Result<()> {
    if period > Duration::from_secs(MAX_PERIOD_SECS) {
        bail!("{} must be at most {} seconds", key, MAX_PERIOD_SECS);
    }
    Ok(())
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let port = file.port.unwrap_or(cli.port);
        let logging_level = match file.logging_level {
            Some(s) => match parse_logging_level(&s) {
                Some(level) => level,
                None => bail!("Unknown logging_level: {}", s),
            },
            None => cli.logging_level.clone(),
        };
        let metrics_enabled = file.metrics_enabled.unwrap_or(cli.metrics_enabled);

        let default_timeout_ms = file.default_timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);
        check_timeout_ms("default_timeout_ms", default_timeout_ms)?;

        let rate_limit = resolve_rate_limit(file.rate_limit.unwrap_or_default())?;
        let auth = resolve_auth(file.auth.unwrap_or_default())?;

        let capabilities = file
            .capabilities
            .into_iter()
            .map(|(name, over)| {
                if let Some(timeout_ms) = over.timeout_ms {
                    check_timeout_ms(&format!("capabilities.{}.timeout_ms", name), timeout_ms)?;
                }
                let resolved = CapabilityOverride {
                    timeout: over.timeout_ms.map(Duration::from_millis),
                    required_scopes: over.required_scopes.map(|s| s.into_iter().collect()),
                };
                Ok((name, resolved))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            port,
            logging_level,
            metrics_enabled,
            default_timeout: Duration::from_millis(default_timeout_ms),
            allow_hot_registration: file.allow_hot_registration.unwrap_or(false),
            status_privileged_scope: file
                .status_privileged_scope
                .unwrap_or_else(|| DEFAULT_PRIVILEGED_SCOPE.to_string()),
            rate_limit,
            auth,
            capabilities,
        })
    }

    pub fn registry_settings(&self) -> RegistrySettings {
        RegistrySettings {
            default_timeout: self.default_timeout,
            allow_hot_registration: self.allow_hot_registration,
            overrides: self.capabilities.clone(),
        }
    }

    /// Configuration as JSON with every secret left out.
    pub fn sanitized(&self) -> Value {
        let auth = match &self.auth.mode {
            AuthMode::None => json!({ "mode": "none" }),
            AuthMode::Static { tokens } => json!({
                "mode": "static",
                "tokens": tokens.len(),
            }),
            AuthMode::Jwt { issuer, audience, .. } => json!({
                "mode": "jwt",
                "issuer": issuer,
                "audience": audience,
                "secret": "[redacted]",
            }),
            AuthMode::Introspection { url, client_id, client_secret } => json!({
                "mode": "introspection",
                "url": url,
                "clientId": client_id,
                "clientSecret": client_secret.as_ref().map(|_| "[redacted]"),
            }),
        };

        let mut capabilities: Vec<(&String, &CapabilityOverride)> = self.capabilities.iter().collect();
        capabilities.sort_by(|a, b| a.0.cmp(b.0));
        let capabilities: serde_json::Map<String, Value> = capabilities
            .into_iter()
            .map(|(name, over)| {
                (
                    name.clone(),
                    json!({
                        "timeoutMs": over.timeout.map(|t| t.as_millis() as u64),
                        "requiredScopes": over.required_scopes,
                    }),
                )
            })
            .collect();

        json!({
            "port": self.port,
            "loggingLevel": format!("{:?}", self.logging_level),
            "metricsEnabled": self.metrics_enabled,
            "defaultTimeoutMs": self.default_timeout.as_millis() as u64,
            "allowHotRegistration": self.allow_hot_registration,
            "statusPrivilegedScope": self.status_privileged_scope,
            "rateLimit": {
                "enabled": self.rate_limit.enabled,
                "requestsPerWindow": self.rate_limit.requests_per_window,
                "windowSecs": self.rate_limit.window.as_secs(),
                "policy": self.rate_limit.policy,
                "idleEvictionSecs": self.rate_limit.idle_eviction.as_secs(),
                "cleanupIntervalSecs": self.rate_limit.cleanup_interval.as_secs(),
            },
            "auth": auth,
            "cacheSize": self.auth.cache_size,
            "capabilities": capabilities,
        })
    }
}

fn resolve_rate_limit(file: RateLimitFileConfig) -> Result<RateLimitSettings> {
    let defaults = RateLimitSettings::default();
    let settings = RateLimitSettings {
        enabled: file.enabled.unwrap_or(defaults.enabled),
        requests_per_window: file.requests_per_window.unwrap_or(defaults.requests_per_window),
        window: file.window_secs.map(Duration::from_secs).unwrap_or(defaults.window),
        policy: file.policy.unwrap_or(defaults.policy),
        idle_eviction: file
            .idle_eviction_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.idle_eviction),
        cleanup_interval: file
            .cleanup_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(defaults.cleanup_interval),
    };

    if settings.enabled {
        if settings.window.is_zero() {
            bail!("rate_limit.window_secs must be greater than zero");
        }
        if settings.requests_per_window == 0 {
            bail!("rate_limit.requests_per_window must be greater than zero");
        }
        if settings.cleanup_interval.is_zero() {
            bail!("rate_limit.cleanup_interval_secs must be greater than zero");
        }
        check_period_secs("rate_limit.window_secs", settings.window)?;
        check_period_secs("rate_limit.idle_eviction_secs", settings.idle_eviction)?;
        check_period_secs("rate_limit.cleanup_interval_secs", settings.cleanup_interval)?;
    }
    Ok(settings)
}

fn resolve_auth(file: AuthFileConfig) -> Result<AuthSettings> {
    let mode = match file.mode.as_deref().unwrap_or("none").to_ascii_lowercase().as_str() {
        "none" => AuthMode::None,
        "static" => AuthMode::Static { tokens: file.tokens },
        "jwt" => match file.jwt_secret {
            Some(secret) if !secret.is_empty() => AuthMode::Jwt {
                secret,
                issuer: file.jwt_issuer,
                audience: file.jwt_audience,
            },
            _ => bail!("auth.jwt_secret is required when auth.mode = \"jwt\""),
        },
        "introspection" => match file.introspection_url {
            Some(url) if !url.is_empty() => AuthMode::Introspection {
                url,
                client_id: file.client_id,
                client_secret: file.client_secret,
            },
            _ => bail!("auth.introspection_url is required when auth.mode = \"introspection\""),
        },
        other => bail!("Unknown auth.mode: {}", other),
    };

    Ok(AuthSettings {
        mode,
        cache_size: file.cache_size.unwrap_or(AuthSettings::default().cache_size),
    })
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
