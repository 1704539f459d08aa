//! Rate Limiting
//!
//! Fixed-window request counting per key. A key is `(identity, capability)`
//! or just `(identity)` depending on the [`KeyPolicy`]. Buckets live in a
//! sharded map, so callers on different keys never contend on one lock.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::context::{Identity, RequestContext};
use super::error::InvocationError;
use super::middleware::{Invocation, Next, Stage, StageResult};
use crate::server::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPolicy {
    #[default]
    PerCapability,
    Global,
}

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window: Duration,
    pub policy: KeyPolicy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            window: Duration::from_secs(60),
            policy: KeyPolicy::PerCapability,
        }
    }
}

/// Bucket key. Anonymous callers and principals never share a bucket, even
/// when a principal's name reads like the anonymous marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLimitKey {
    pub identity: Identity,
    pub capability: Option<String>,
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identity {
            Identity::Anonymous => f.write_str("<anonymous>")?,
            Identity::Principal(name) => f.write_str(name)?,
        }
        match &self.capability {
            Some(capability) => write!(f, ":{}", capability),
            None => Ok(()),
        }
    }
}

/// Counter state for a single key
#[derive(Debug)]
struct RateLimitBucket {
    count: u32,
    window_start: Instant,
}

impl RateLimitBucket {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }

    fn reset_if_expired(&mut self, now: Instant, window: Duration) {
        if self.is_expired(now, window) {
            self.count = 0;
            self.window_start = now;
        }
    }

    fn window_remaining(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.saturating_duration_since(self.window_start))
    }
}

/// Where a caller stands in its window after one counted call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    /// Time until the window resets
    pub reset_after: Duration,
}

/// Point-in-time view of one bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitEntry {
    pub key: RateLimitKey,
    pub count: u32,
    pub window_remaining: Duration,
}

/// Rate limiter for capability invocations
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<RateLimitKey, RateLimitBucket>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn key_for(&self, identity: &Identity, capability: &str) -> RateLimitKey {
        RateLimitKey {
            identity: identity.clone(),
            capability: match self.config.policy {
                KeyPolicy::PerCapability => Some(capability.to_string()),
                KeyPolicy::Global => None,
            },
        }
    }

    /// Count one call against `key`.
    ///
    /// Returns the calls left in the current window, or the time until the
    /// window resets when the call is over the limit. Rejected calls are
    /// counted too.
    pub fn check_and_record(&self, key: &RateLimitKey) -> Result<u32, Duration> {
        self.record(key)
            .map(|quota| quota.remaining)
            .map_err(|quota| quota.reset_after)
    }

    /// Like [`RateLimiter::check_and_record`], but reports the full quota
    /// either way.
    pub fn record(&self, key: &RateLimitKey) -> Result<Quota, Quota> {
        let now = Instant::now();
        let window = self.config.window;
        let limit = self.config.requests_per_window;

        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut bucket = self
            .buckets
            .entry(key.clone())
            .or_insert_with(|| RateLimitBucket::new(now));

        bucket.reset_if_expired(now, window);
        bucket.count = bucket.count.saturating_add(1);

        let quota = Quota {
            limit,
            remaining: limit.saturating_sub(bucket.count),
            reset_after: bucket.window_remaining(now, window),
        };
        if bucket.count > limit {
            return Err(quota);
        }
        Ok(quota)
    }

    /// Calls counted in the current window for `key` (for debugging/metrics)
    pub fn usage(&self, key: &RateLimitKey) -> Option<u32> {
        let now = Instant::now();
        self.buckets.get(key).map(|bucket| {
            if bucket.is_expired(now, self.config.window) {
                0
            } else {
                bucket.count
            }
        })
    }

    /// All live buckets, sorted by key. Read-only: expired windows are
    /// reported as empty rather than reset.
    pub fn snapshot(&self) -> Vec<RateLimitEntry> {
        let now = Instant::now();
        let window = self.config.window;
        let mut entries: Vec<RateLimitEntry> = self
            .buckets
            .iter()
            .map(|item| {
                let bucket = item.value();
                let expired = bucket.is_expired(now, window);
                RateLimitEntry {
                    key: item.key().clone(),
                    count: if expired { 0 } else { bucket.count },
                    window_remaining: if expired {
                        Duration::ZERO
                    } else {
                        bucket.window_remaining(now, window)
                    },
                }
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Drop buckets whose window started more than `max_idle` ago.
    /// Returns how many were removed.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let threshold = max_idle.max(self.config.window);
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.window_start) < threshold);
        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!("Evicted {} idle rate limit buckets", removed);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[async_trait]
impl Stage for RateLimiter {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    async fn handle(&self, ctx: &mut RequestContext, invocation: &Invocation, next: Next<'_>) -> StageResult {
        let key = self.key_for(&ctx.identity, &invocation.descriptor.name);
        match self.record(&key) {
            Ok(quota) => {
                ctx.record("rate_limit.remaining", quota.remaining.to_string());
                ctx.quota = Some(quota);
                next.run(ctx, invocation).await
            }
            Err(quota) => {
                let retry_after = quota.reset_after;
                ctx.quota = Some(quota);
                warn!(
                    "Rate limit exceeded for {} on {}, retry after {:?}",
                    ctx.identity, invocation.descriptor.name, retry_after
                );
                metrics::record_rate_limit_hit(&invocation.descriptor.name);
                Err(InvocationError::RateLimited { retry_after })
            }
        }
    }
}
