//! Key-value storage and pub/sub abstractions shared by session storage,
//! rate limiting, token rotation, and the cross-worker connection hub.
//!
//! Each trait has at least two implementations: an in-process one for
//! single-worker deployments and tests, and a database-backed one workers
//! can share (§4.A).

pub mod error;
mod memory;
mod pubsub_memory;
mod pubsub_sqlx;
mod sqlx_store;

use std::time::Duration;

use async_trait::async_trait;

pub use crate::{
    error::{Error, Result},
    memory::MemoryKv,
    pubsub_memory::InProcessPubSub,
    pubsub_sqlx::SqlxPubSub,
    sqlx_store::SqlxKv,
};

pub type BoxStream = std::pin::Pin<Box<dyn futures::Stream<Item = Vec<u8>> + Send>>;

/// Distributed key-value store used for sessions, rate-limit counters, and
/// refresh-token rotation state.
#[async_trait]
pub trait KVStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically replace `key`'s value with `new` only if its current value
    /// equals `expected` (`None` means "key absent"). Returns whether the
    /// swap took place. The basis for refresh-token rotation's reuse
    /// detection (§4.F).
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool>;

    /// Add `member` to the sorted set at `key` with the given `score`
    /// (re-inserting replaces any existing score for that member). `ttl`
    /// bounds the whole key's lifetime as a safety net against orphaned
    /// sets, not an expiry on the individual member.
    async fn zadd(&self, key: &str, score: i64, member: &str, ttl: Option<Duration>) -> Result<()>;

    /// Members with `min <= score <= max`, ascending by score. Use
    /// `i64::MIN`/`i64::MAX` for an open end.
    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<(String, i64)>>;

    /// Remove members with `min <= score <= max`; returns the number removed.
    async fn zremrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<u64>;

    /// Number of members currently in the sorted set at `key`.
    async fn zcard(&self, key: &str) -> Result<u64>;
}

/// Cross-worker publish/subscribe bus used by the `MessageBroker` (§4.D).
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;
    async fn subscribe(&self, topic: &str) -> Result<BoxStream>;
}
