use async_trait::async_trait;
use common_redis::Client;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::{InMemoryRateLimiter, RateLimitDecision, RateLimiter};

pub const RATE_LIMIT_KEY_PREFIX: &str = "lead-capture:ratelimit:";

// The shared budget is fixed server side; per-call limits only apply to the
// in-memory fallback.
pub const REDIS_LIMIT: u32 = 5;
pub const REDIS_WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window limiter shared by every instance through Redis.
///
/// Each hit is a sorted-set member scored with its timestamp; trimming,
/// counting and recording run in one script so concurrent hits cannot
/// overshoot the budget. When Redis errors, that single call is answered by
/// the in-memory limiter and the next call tries Redis again.
pub struct RedisRateLimiter {
    redis: Arc<dyn Client + Send + Sync>,
    fallback: Arc<InMemoryRateLimiter>,
    key_prefix: String,
}

impl RedisRateLimiter {
    pub fn new(redis: Arc<dyn Client + Send + Sync>, fallback: Arc<InMemoryRateLimiter>) -> Self {
        Self {
            redis,
            fallback,
            key_prefix: RATE_LIMIT_KEY_PREFIX.to_string(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[async_trait]
impl RateLimiter for RedisRateLimiter {
    async fn check(
        &self,
        key: &str,
        limit: Option<u32>,
        window: Option<Duration>,
    ) -> RateLimitDecision {
        let now_ms = now_millis();
        let member = format!("{now_ms}-{:016x}", rand::random::<u64>());

        let result = self
            .redis
            .sliding_window_hit(
                format!("{}{key}", self.key_prefix),
                now_ms,
                REDIS_WINDOW.as_millis() as u64,
                u64::from(REDIS_LIMIT),
                member,
            )
            .await;

        match result {
            Ok(hit) => {
                let used = u32::try_from(hit.count).unwrap_or(u32::MAX);
                if hit.allowed {
                    RateLimitDecision::allowed(REDIS_LIMIT.saturating_sub(used))
                } else {
                    RateLimitDecision::denied()
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "redis rate limit check failed, using in-memory limiter");
                metrics::counter!("rate_limiter_fallback_total").increment(1);
                self.fallback.check_now(key, limit, window)
            }
        }
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryConfig;
    use common_redis::{
        CustomRedisError, MockRedisClient, MockRedisValue, RedisErrorKind, SlidingWindowCount,
    };

    fn limiter(client: MockRedisClient) -> RedisRateLimiter {
        RedisRateLimiter::new(
            Arc::new(client),
            Arc::new(InMemoryRateLimiter::new(InMemoryConfig::default())),
        )
    }

    #[tokio::test]
    async fn test_allowed_hit_reports_remaining() {
        let client = MockRedisClient::new().sliding_window_hit_ret(
            "lead-capture:ratelimit:203.0.113.9",
            Ok(SlidingWindowCount {
                allowed: true,
                count: 2,
            }),
        );
        let decision = limiter(client).check("203.0.113.9", None, None).await;
        assert_eq!(decision, RateLimitDecision::allowed(3));
    }

    #[tokio::test]
    async fn test_full_window_denies() {
        let client = MockRedisClient::new().sliding_window_hit_ret(
            "lead-capture:ratelimit:203.0.113.9",
            Ok(SlidingWindowCount {
                allowed: false,
                count: 5,
            }),
        );
        let decision = limiter(client).check("203.0.113.9", None, None).await;
        assert_eq!(decision, RateLimitDecision::denied());
    }

    #[tokio::test]
    async fn test_caller_limit_and_window_are_ignored() {
        let client = MockRedisClient::new().sliding_window_hit_ret(
            "lead-capture:ratelimit:k",
            Ok(SlidingWindowCount {
                allowed: true,
                count: 1,
            }),
        );
        let limiter = limiter(client.clone());

        let decision = limiter
            .check("k", Some(100), Some(Duration::from_secs(1)))
            .await;
        assert_eq!(decision, RateLimitDecision::allowed(4));

        let calls = client.get_calls();
        assert_eq!(calls.len(), 1);
        match &calls[0].value {
            MockRedisValue::Window {
                window_ms, limit, ..
            } => {
                assert_eq!(*window_ms, 60_000);
                assert_eq!(*limit, 5);
            }
            other => panic!("unexpected call value {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_backend_error_falls_back_for_that_call_only() {
        let client = MockRedisClient::new().sliding_window_hit_ret(
            "lead-capture:ratelimit:k",
            Err(CustomRedisError::from_redis_kind(
                RedisErrorKind::IoError,
                "connection refused",
            )),
        );
        let fallback = Arc::new(InMemoryRateLimiter::new(InMemoryConfig::default()));
        let limiter = RedisRateLimiter::new(Arc::new(client.clone()), fallback.clone());

        // The fallback honors the caller's limit.
        assert!(limiter.check("k", Some(1), None).await.allowed);
        assert!(!limiter.check("k", Some(1), None).await.allowed);
        assert_eq!(fallback.tracked_keys(), 1);

        // Every call still went to redis first.
        assert_eq!(client.get_calls().len(), 2);
    }

    #[tokio::test]
    async fn test_custom_key_prefix() {
        let client = MockRedisClient::new().sliding_window_hit_ret(
            "test:k",
            Ok(SlidingWindowCount {
                allowed: true,
                count: 5,
            }),
        );
        let decision = limiter(client)
            .with_key_prefix("test:")
            .check("k", None, None)
            .await;
        assert_eq!(decision, RateLimitDecision::allowed(0));
    }
}
