use async_trait::async_trait;
use common_redis::Client as RedisClient;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;
pub mod redis;

pub use memory::{InMemoryConfig, InMemoryRateLimiter};
pub use redis::RedisRateLimiter;

/// Requests allowed per key and window when the caller does not say otherwise.
pub const DEFAULT_LIMIT: u32 = 5;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
}

impl RateLimitDecision {
    pub fn allowed(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
        }
    }

    pub fn denied() -> Self {
        Self {
            allowed: false,
            remaining: 0,
        }
    }
}

/// Keyed request limiter. Implementations never fail: backend problems are
/// absorbed and answered locally.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(
        &self,
        key: &str,
        limit: Option<u32>,
        window: Option<Duration>,
    ) -> RateLimitDecision;

    /// Label used in logs and metrics.
    fn backend(&self) -> &'static str;
}

/// Picks the limiter strategy once, at construction: Redis when a client is
/// available, otherwise the process-local window table.
pub fn build_rate_limiter(
    redis: Option<Arc<dyn RedisClient + Send + Sync>>,
    memory: InMemoryConfig,
) -> Arc<dyn RateLimiter> {
    let local = Arc::new(InMemoryRateLimiter::new(memory));
    match redis {
        Some(client) => {
            tracing::info!("rate limiting with redis sliding window");
            Arc::new(RedisRateLimiter::new(client, local))
        }
        None => {
            tracing::warn!(
                "no redis configured, rate limiting in memory; limits are per process"
            );
            local
        }
    }
}
