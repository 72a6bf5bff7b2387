use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use crate::{RateLimitDecision, RateLimiter, DEFAULT_LIMIT, DEFAULT_WINDOW};

#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    pub default_limit: u32,
    pub default_window: Duration,
    /// Minimum time between two full sweeps of expired windows.
    pub cleanup_interval: Duration,
    /// Hard cap on tracked keys. Oldest-inserted keys go first once exceeded.
    pub max_entries: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            default_window: DEFAULT_WINDOW,
            cleanup_interval: Duration::from_secs(60),
            max_entries: 10_000,
        }
    }
}

#[derive(Debug)]
struct Window {
    count: u32,
    reset_at: Instant,
    seq: u64,
}

#[derive(Debug)]
struct WindowTable {
    windows: HashMap<String, Window>,
    // Insertion order as (seq, key). Entries whose seq no longer matches the
    // live window are stale and skipped.
    order: VecDeque<(u64, String)>,
    next_seq: u64,
    last_cleanup: Instant,
}

impl WindowTable {
    fn insert(&mut self, key: &str, reset_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.windows.insert(
            key.to_string(),
            Window {
                count: 1,
                reset_at,
                seq,
            },
        );
        self.order.push_back((seq, key.to_string()));
    }

    fn sweep_expired(&mut self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| window.reset_at > now);
        let windows = &self.windows;
        self.order
            .retain(|(seq, key)| windows.get(key).is_some_and(|w| w.seq == *seq));
        self.last_cleanup = now;
        before - self.windows.len()
    }

    fn evict_oldest(&mut self, max_entries: usize) -> usize {
        let mut evicted = 0;
        while self.windows.len() > max_entries {
            let Some((seq, key)) = self.order.pop_front() else {
                break;
            };
            if self.windows.get(&key).is_some_and(|w| w.seq == seq) {
                self.windows.remove(&key);
                evicted += 1;
            }
        }
        evicted
    }
}

/// Fixed-window counter per key, held in process memory.
///
/// Windows expire lazily when their key is next checked. A full sweep runs at
/// most once per `cleanup_interval`, and the table never grows past
/// `max_entries`. State is local to this process: several instances behind a
/// load balancer each enforce their own budget.
pub struct InMemoryRateLimiter {
    config: InMemoryConfig,
    table: Mutex<WindowTable>,
}

impl InMemoryRateLimiter {
    /// A cap of zero is raised to one: the key being checked must survive
    /// its own insertion.
    pub fn new(mut config: InMemoryConfig) -> Self {
        config.max_entries = config.max_entries.max(1);
        Self {
            config,
            table: Mutex::new(WindowTable {
                windows: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
                last_cleanup: Instant::now(),
            }),
        }
    }

    fn lock_table(&self) -> MutexGuard<'_, WindowTable> {
        match self.table.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.lock_table().windows.len()
    }

    pub fn check_now(
        &self,
        key: &str,
        limit: Option<u32>,
        window: Option<Duration>,
    ) -> RateLimitDecision {
        let limit = limit.unwrap_or(self.config.default_limit);
        let window = window.unwrap_or(self.config.default_window);
        let now = Instant::now();

        let mut table = self.lock_table();

        if now.duration_since(table.last_cleanup) >= self.config.cleanup_interval {
            let swept = table.sweep_expired(now);
            if swept > 0 {
                tracing::debug!(swept, "swept expired rate limit windows");
            }
        }

        if limit == 0 {
            return RateLimitDecision::denied();
        }

        if let Some(current) = table.windows.get_mut(key) {
            if current.reset_at > now {
                if current.count >= limit {
                    return RateLimitDecision::denied();
                }
                current.count += 1;
                return RateLimitDecision::allowed(limit - current.count);
            }
        }

        table.insert(key, now + window);
        let evicted = table.evict_oldest(self.config.max_entries);
        if evicted > 0 {
            metrics::counter!("rate_limiter_evictions_total").increment(evicted as u64);
        }

        RateLimitDecision::allowed(limit - 1)
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn check(
        &self,
        key: &str,
        limit: Option<u32>,
        window: Option<Duration>,
    ) -> RateLimitDecision {
        self.check_now(key, limit, window)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> InMemoryRateLimiter {
        InMemoryRateLimiter::new(InMemoryConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows_limit_then_denies() {
        let limiter = limiter();

        for expected_remaining in (0..5).rev() {
            let decision = limiter.check("10.0.0.1", None, None).await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let decision = limiter.check("10.0.0.1", None, None).await;
        assert_eq!(decision, RateLimitDecision::denied());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_allows_again() {
        let limiter = limiter();
        for _ in 0..3 {
            assert!(limiter.check("k", Some(3), None).await.allowed);
        }
        assert!(!limiter.check("k", Some(3), None).await.allowed);

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!limiter.check("k", Some(3), None).await.allowed);

        tokio::time::advance(Duration::from_secs(1)).await;
        let decision = limiter.check("k", Some(3), None).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let limiter = limiter();
        assert!(limiter.check("a", Some(1), None).await.allowed);
        assert!(!limiter.check("a", Some(1), None).await.allowed);
        assert!(limiter.check("b", Some(1), None).await.allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_caller_window_is_honored() {
        let limiter = limiter();
        assert!(limiter
            .check("k", Some(1), Some(Duration::from_secs(5)))
            .await
            .allowed);
        assert!(!limiter
            .check("k", Some(1), Some(Duration::from_secs(5)))
            .await
            .allowed);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(limiter
            .check("k", Some(1), Some(Duration::from_secs(5)))
            .await
            .allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_limit_always_denies() {
        let limiter = limiter();
        assert!(!limiter.check("k", Some(0), None).await.allowed);
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_runs_at_most_once_per_interval() {
        let limiter = InMemoryRateLimiter::new(InMemoryConfig {
            cleanup_interval: Duration::from_secs(60),
            ..InMemoryConfig::default()
        });

        limiter.check("short", None, Some(Duration::from_secs(1))).await;
        limiter.check("other", None, Some(Duration::from_secs(1))).await;
        assert_eq!(limiter.tracked_keys(), 2);

        // Both windows expired, but the sweep interval has not elapsed yet.
        tokio::time::advance(Duration::from_secs(10)).await;
        limiter.check("fresh", None, None).await;
        assert_eq!(limiter.tracked_keys(), 3);

        tokio::time::advance(Duration::from_secs(50)).await;
        limiter.check("fresh", None, None).await;
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_evicts_oldest_inserted_first() {
        let limiter = InMemoryRateLimiter::new(InMemoryConfig {
            max_entries: 2,
            ..InMemoryConfig::default()
        });

        assert!(limiter.check("first", Some(1), None).await.allowed);
        assert!(limiter.check("second", Some(1), None).await.allowed);
        assert!(limiter.check("third", Some(1), None).await.allowed);
        assert_eq!(limiter.tracked_keys(), 2);

        // "first" was evicted, so it starts a fresh window.
        assert!(limiter.check("first", Some(1), None).await.allowed);
        assert!(!limiter.check("third", Some(1), None).await.allowed);
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cap_still_limits() {
        let limiter = InMemoryRateLimiter::new(InMemoryConfig {
            max_entries: 0,
            ..InMemoryConfig::default()
        });

        assert!(limiter.check("10.0.0.9", Some(2), None).await.allowed);
        assert!(limiter.check("10.0.0.9", Some(2), None).await.allowed);
        assert!(!limiter.check("10.0.0.9", Some(2), None).await.allowed);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reinserted_key_moves_to_back_of_eviction_order() {
        let limiter = InMemoryRateLimiter::new(InMemoryConfig {
            max_entries: 2,
            cleanup_interval: Duration::from_secs(3600),
            ..InMemoryConfig::default()
        });

        limiter.check("a", Some(5), Some(Duration::from_secs(1))).await;
        limiter.check("b", Some(5), None).await;

        // "a" expires and is re-inserted, so "b" is now the oldest.
        tokio::time::advance(Duration::from_secs(2)).await;
        limiter.check("a", Some(5), None).await;
        limiter.check("c", Some(5), None).await;

        let decision = limiter.check("a", Some(5), None).await;
        assert_eq!(decision.remaining, 3);
        let decision = limiter.check("b", Some(5), None).await;
        assert_eq!(decision.remaining, 4);
    }
}
