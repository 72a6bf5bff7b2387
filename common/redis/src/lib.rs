use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

mod client;
mod mock;

pub use client::RedisClient;
pub use mock::{MockRedisCall, MockRedisClient, MockRedisValue};

// Re-exported so consumers can build CustomRedisError values in tests
pub use redis::ErrorKind as RedisErrorKind;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Timeout error")]
    Timeout,
    #[error(transparent)]
    Redis(#[from] Arc<redis::RedisError>),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl CustomRedisError {
    /// Create a Redis error from an ErrorKind (primarily for testing)
    pub fn from_redis_kind(kind: redis::ErrorKind, description: &'static str) -> Self {
        CustomRedisError::Redis(Arc::new(redis::RedisError::from((kind, description))))
    }
}

/// Outcome of one sliding-window hit against a sorted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowCount {
    /// Whether the hit was recorded, i.e. the window still had room.
    pub allowed: bool,
    /// Entries inside the window after the hit was (or was not) recorded.
    pub count: u64,
}

/// A simple redis wrapper
/// Exposes the few operations the lead services need, and can be mocked
#[async_trait]
pub trait Client {
    /// Atomically trims `key` to the window ending at `now_ms`, then records
    /// `member` if fewer than `limit` entries remain.
    async fn sliding_window_hit(
        &self,
        key: String,
        now_ms: u64,
        window_ms: u64,
        limit: u64,
        member: String,
    ) -> Result<SlidingWindowCount, CustomRedisError>;

    async fn ping(&self) -> Result<(), CustomRedisError>;
}
