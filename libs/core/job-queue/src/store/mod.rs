//! Coordination store abstraction.
//!
//! The queue client and the rate limiter only ever issue single atomic
//! primitives, so any backend that offers lists, scored sets, expiring
//! strings and counters can host them.

mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::{RedisStore, RetryPolicy};

use crate::error::QueueResult;
use async_trait::async_trait;
use std::time::Duration;

/// Primitive operations the queue and rate limiter depend on.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Liveness check.
    async fn ping(&self) -> QueueResult<()>;

    /// Push a value onto the head of a list.
    async fn lpush(&self, key: &str, value: &str) -> QueueResult<()>;

    /// Pop from the tail of the first non-empty list, consulting `keys` in
    /// order and waiting up to `timeout`. Returns `(key, value)`.
    async fn brpop(&self, keys: &[String], timeout: Duration)
    -> QueueResult<Option<(String, String)>>;

    /// Set a string value that expires after `ttl`.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> QueueResult<()>;

    async fn get(&self, key: &str) -> QueueResult<Option<String>>;

    async fn del(&self, key: &str) -> QueueResult<()>;

    /// Insert or rescore a member of a sorted set.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> QueueResult<()>;

    /// Members with a score at or below `max`, lowest score first.
    async fn zrangebyscore(&self, key: &str, max: f64) -> QueueResult<Vec<String>>;

    /// Remove a member; returns whether it was present.
    async fn zrem(&self, key: &str, member: &str) -> QueueResult<bool>;

    /// Increment a counter, setting `ttl` only when the counter was created
    /// by this increment. Returns the post-increment value.
    async fn incr_with_expiry(&self, key: &str, ttl: Duration) -> QueueResult<i64>;

    async fn llen(&self, key: &str) -> QueueResult<u64>;

    async fn zcard(&self, key: &str) -> QueueResult<u64>;

    /// List range with Redis index semantics (negative indexes count from the end).
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> QueueResult<Vec<String>>;
}
