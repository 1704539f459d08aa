//! Service Lifecycle
//!
//! Wires registry, limiter, gatekeeper, chain, dispatcher and status reporter
//! together, and tracks whether the server is accepting invocations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::auth::AuthGatekeeper;
use super::dispatcher::Dispatcher;
use super::middleware::MiddlewareChain;
use super::rate_limit::RateLimiter;
use super::registry::CapabilityRegistry;
use super::resources::RecentLogs;
use super::status::{StatusReport, StatusReporter};
use super::{resources, tools};
use crate::config::{AppConfig, RateLimitSettings};
use crate::server::metrics;

/// Shared readiness flag. Starts not ready.
#[derive(Debug, Clone, Default)]
pub struct HealthSignal(Arc<AtomicBool>);

impl HealthSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct McpService {
    pub registry: Arc<CapabilityRegistry>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub gatekeeper: Arc<AuthGatekeeper>,
    pub dispatcher: Arc<Dispatcher>,
    pub status: Arc<StatusReporter>,
    pub health: HealthSignal,
    pub recent_logs: RecentLogs,
    privileged_scope: String,
    rate_limit_settings: RateLimitSettings,
    shutdown: CancellationToken,
}

impl McpService {
    /// Build every component. Nothing is registered and the service is not
    /// ready yet.
    pub fn init(config: &AppConfig, version: &str) -> Result<Self> {
        let health = HealthSignal::new();
        let registry = Arc::new(CapabilityRegistry::with_settings(config.registry_settings()));

        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::new(config.rate_limit.limiter_config())));
        if rate_limiter.is_none() {
            info!("Rate limiting disabled");
        }

        let gatekeeper = Arc::new(
            AuthGatekeeper::from_settings(&config.auth).context("Failed to set up authentication")?,
        );
        let chain = MiddlewareChain::standard(gatekeeper.clone(), rate_limiter.clone());
        debug!("Middleware chain: {:?}", chain.stage_names());

        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), chain, health.clone()));
        let status = Arc::new(StatusReporter::new(
            registry.clone(),
            rate_limiter.clone(),
            health.clone(),
            version,
        ));

        Ok(Self {
            registry,
            rate_limiter,
            gatekeeper,
            dispatcher,
            status,
            health,
            recent_logs: RecentLogs::default(),
            privileged_scope: config.status_privileged_scope.clone(),
            rate_limit_settings: config.rate_limit.clone(),
            shutdown: CancellationToken::new(),
        })
    }

    /// Serve `logs://recent` from `logs` instead of a private buffer. The
    /// binary passes the buffer its tracing layer writes to.
    pub fn with_recent_logs(mut self, logs: RecentLogs) -> Self {
        self.recent_logs = logs;
        self
    }

    /// Register the tools and resources that ship with the server.
    pub fn register_builtins(&self, config: &AppConfig) -> Result<()> {
        tools::register_all_tools(&self.registry).context("Failed to register built-in tools")?;
        resources::register_all_resources(
            &self.registry,
            self.status.clone(),
            &self.privileged_scope,
            config.sanitized(),
            self.recent_logs.clone(),
        )
        .context("Failed to register built-in resources")?;
        Ok(())
    }

    /// Seal the registry and start accepting invocations.
    pub fn ready(&self) {
        self.registry.close();
        metrics::set_registered_capabilities(self.registry.len());
        self.health.set_ready(true);
        info!(
            "MCP service ready: {} tools, {} resources",
            self.registry.tool_count(),
            self.registry.resource_count()
        );
    }

    /// Stop accepting invocations. In-flight ones run to completion.
    pub fn shutdown(&self) {
        if self.health.is_ready() {
            info!("MCP service shutting down");
        }
        self.health.set_ready(false);
        self.shutdown.cancel();
    }

    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// Whether `credential` verifies and carries the privileged status scope.
    pub async fn is_privileged(&self, credential: Option<&str>) -> bool {
        let Some(credential) = credential else {
            return false;
        };
        match self.gatekeeper.verify(credential).await {
            Ok(verified) => verified.scopes.contains(&self.privileged_scope),
            Err(_) => false,
        }
    }

    pub async fn status_for(&self, credential: Option<&str>) -> StatusReport {
        let privileged = self.is_privileged(credential).await;
        self.status.report(privileged)
    }

    /// Periodically drop idle rate limit buckets until shutdown.
    pub fn spawn_maintenance(&self) -> Option<JoinHandle<()>> {
        let limiter = self.rate_limiter.clone()?;
        let settings = self.rate_limit_settings.clone();
        let shutdown = self.shutdown.clone();

        Some(tokio::spawn(async move {
            run_maintenance(limiter, settings.cleanup_interval, settings.idle_eviction, shutdown).await
        }))
    }
}

async fn run_maintenance(
    limiter: Arc<RateLimiter>,
    every: Duration,
    max_idle: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    // The first tick completes immediately
    interval.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let removed = limiter.evict_idle(max_idle);
                if removed > 0 {
                    info!("Rate limiter maintenance evicted {} idle buckets", removed);
                }
            }
        }
    }
    debug!("Rate limiter maintenance stopped");
}
