use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::{Client, CustomRedisError, SlidingWindowCount};

#[derive(Clone, Default)]
pub struct MockRedisClient {
    sliding_window_ret: HashMap<String, Result<SlidingWindowCount, CustomRedisError>>,
    ping_ret: Option<Result<(), CustomRedisError>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<MockRedisCall>> {
        match self.calls.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn sliding_window_hit_ret(
        &mut self,
        key: &str,
        ret: Result<SlidingWindowCount, CustomRedisError>,
    ) -> Self {
        self.sliding_window_ret.insert(key.to_owned(), ret);
        self.clone()
    }

    pub fn ping_ret(&mut self, ret: Result<(), CustomRedisError>) -> Self {
        self.ping_ret = Some(ret);
        self.clone()
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        self.lock_calls().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRedisValue {
    None,
    Window {
        now_ms: u64,
        window_ms: u64,
        limit: u64,
        member: String,
    },
}

#[derive(Debug, Clone)]
pub struct MockRedisCall {
    pub op: String,
    pub key: String,
    pub value: MockRedisValue,
}

#[async_trait]
impl Client for MockRedisClient {
    async fn sliding_window_hit(
        &self,
        key: String,
        now_ms: u64,
        window_ms: u64,
        limit: u64,
        member: String,
    ) -> Result<SlidingWindowCount, CustomRedisError> {
        self.lock_calls().push(MockRedisCall {
            op: "sliding_window_hit".to_string(),
            key: key.clone(),
            value: MockRedisValue::Window {
                now_ms,
                window_ms,
                limit,
                member,
            },
        });

        self.sliding_window_ret
            .get(&key)
            .cloned()
            .unwrap_or(Err(CustomRedisError::NotFound))
    }

    async fn ping(&self) -> Result<(), CustomRedisError> {
        self.lock_calls().push(MockRedisCall {
            op: "ping".to_string(),
            key: String::new(),
            value: MockRedisValue::None,
        });

        self.ping_ret.clone().unwrap_or(Ok(()))
    }
}
