//! Server Status
//!
//! Read-only introspection: how many capabilities are registered, how long
//! the server has been up, and what the rate limiter currently holds.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::context::Identity;
use super::rate_limit::{RateLimitKey, RateLimiter};
use super::registry::CapabilityRegistry;
use super::service::HealthSignal;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub capabilities: usize,
    pub tools: usize,
    pub resources: usize,
    pub uptime_seconds: u64,
    pub healthy: bool,
    pub version: String,
    pub rate_limits: Vec<RateLimitStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub key: String,
    pub count: u32,
    /// Seconds until the window resets, rounded up
    pub window_remaining: u64,
}

pub struct StatusReporter {
    registry: Arc<CapabilityRegistry>,
    rate_limiter: Option<Arc<RateLimiter>>,
    health: HealthSignal,
    version: String,
    start_time: Instant,
    /// Random per process, mixed into every identity digest
    redaction_key: [u8; 16],
}

fn ceil_secs(duration: Duration) -> u64 {
    duration
        .as_secs()
        .saturating_add(u64::from(duration.subsec_nanos() > 0))
}

impl StatusReporter {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        rate_limiter: Option<Arc<RateLimiter>>,
        health: HealthSignal,
        version: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            rate_limiter,
            health,
            version: version.into(),
            start_time: Instant::now(),
            redaction_key: uuid::Uuid::new_v4().into_bytes(),
        }
    }

    /// Identities are only shown to privileged callers; everyone else sees a
    /// digest prefix that is stable for the life of the process.
    fn redact_key(&self, key: &RateLimitKey) -> String {
        let identity = match &key.identity {
            Identity::Anonymous => "<anonymous>".to_string(),
            Identity::Principal(name) => {
                let digest = Sha256::new()
                    .chain_update(self.redaction_key)
                    .chain_update(name.as_bytes())
                    .finalize();
                format!("id-{:x}", digest)[..15].to_string()
            }
        };
        match &key.capability {
            Some(capability) => format!("{}:{}", identity, capability),
            None => identity,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Build a report. Never mutates limiter or registry state.
    pub fn report(&self, privileged: bool) -> StatusReport {
        let rate_limits = self
            .rate_limiter
            .as_ref()
            .map(|limiter| {
                limiter
                    .snapshot()
                    .into_iter()
                    .map(|entry| RateLimitStatus {
                        key: if privileged {
                            entry.key.to_string()
                        } else {
                            self.redact_key(&entry.key)
                        },
                        count: entry.count,
                        window_remaining: ceil_secs(entry.window_remaining),
                    })
                    .collect()
            })
            .unwrap_or_default();

        StatusReport {
            capabilities: self.registry.len(),
            tools: self.registry.tool_count(),
            resources: self.registry.resource_count(),
            uptime_seconds: self.uptime_seconds(),
            healthy: self.health.is_ready(),
            version: self.version.clone(),
            rate_limits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::rate_limit::RateLimitConfig;
    use crate::mcp::registry::CapabilityBuilder;
    use serde_json::json;

    fn reporter() -> (StatusReporter, Arc<RateLimiter>) {
        let registry = Arc::new(CapabilityRegistry::new());
        let echo = CapabilityBuilder::tool("echo")
            .build(|_ctx, args| async move { Ok(args) })
            .unwrap();
        registry.register(echo).unwrap();
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
        let health = HealthSignal::new();
        health.set_ready(true);
        let reporter = StatusReporter::new(registry, Some(limiter.clone()), health, "test");
        (reporter, limiter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_is_idempotent() {
        let (reporter, limiter) = reporter();
        let key = limiter.key_for(&Identity::Principal("u1".to_string()), "echo");
        limiter.check_and_record(&key).unwrap();

        let first = reporter.report(true);
        let second = reporter.report(true);
        assert_eq!(first.capabilities, second.capabilities);
        assert_eq!(first.rate_limits, second.rate_limits);
        assert_eq!(limiter.usage(&key), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_privileged_sees_identities() {
        let (reporter, limiter) = reporter();
        let key = limiter.key_for(&Identity::Principal("alice".to_string()), "echo");
        limiter.check_and_record(&key).unwrap();

        let report = reporter.report(true);
        assert_eq!(report.rate_limits[0].key, "alice:echo");
        assert_eq!(report.rate_limits[0].count, 1);
        assert_eq!(report.rate_limits[0].window_remaining, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unprivileged_sees_digests() {
        let (reporter, limiter) = reporter();
        let key = limiter.key_for(&Identity::Principal("alice".to_string()), "echo");
        limiter.check_and_record(&key).unwrap();
        tokio::time::advance(Duration::from_millis(1500)).await;

        let report = reporter.report(false);
        let entry = &report.rate_limits[0];
        assert!(!entry.key.contains("alice"));
        assert!(entry.key.starts_with("id-"));
        assert!(entry.key.ends_with(":echo"));
        assert_eq!(entry.window_remaining, 59);
        assert_eq!(report.rate_limits, reporter.report(false).rate_limits);
    }

    #[tokio::test(start_paused = true)]
    async fn test_digests_are_keyed_per_reporter() {
        let (reporter, limiter) = reporter();
        let (other, _) = self::reporter();
        let key = limiter.key_for(&Identity::Principal("admin-user".to_string()), "echo");

        let digest = reporter.redact_key(&key);
        assert_eq!(digest, reporter.redact_key(&key));
        assert_ne!(digest, other.redact_key(&key));

        let unkeyed = format!("{:x}", Sha256::digest(b"admin-user"));
        assert!(!digest.contains(&unkeyed[..12]));
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let (reporter, _) = reporter();
        let value = serde_json::to_value(reporter.report(false)).unwrap();
        assert_eq!(value["capabilities"], json!(1));
        assert!(value.get("uptimeSeconds").is_some());
        assert!(value["rateLimits"].as_array().unwrap().is_empty());
    }
}
