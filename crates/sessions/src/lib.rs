//! `SessionStore` (§4.C): a map of `session_id -> SessionInfo` with TTL, plus
//! secondary indexes by worker and user so the hub can enumerate connections
//! for cleanup and multi-device presence.

mod kv_store;
mod memory_store;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use crate::{kv_store::KvSessionStore, memory_store::MemorySessionStore};

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(3600);

/// A session survives a rolling restart only as this record; WebSocket
/// connections themselves do not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub worker_id: String,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
    pub metadata: std::collections::BTreeMap<String, String>,
}

impl SessionInfo {
    #[must_use]
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>, worker_id: impl Into<String>) -> Self {
        let now = chatcore_common::now_millis();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            worker_id: worker_id.into(),
            created_at_ms: now,
            last_activity_ms: now,
            metadata: std::collections::BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn is_expired(&self, now_ms: u64, ttl: Duration) -> bool {
        now_ms.saturating_sub(self.last_activity_ms) >= ttl.as_millis() as u64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HealthStatus {
    pub healthy: bool,
    pub latency_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session already exists: {0}")]
    AlreadyExists(String),
    #[error(transparent)]
    Kv(#[from] chatcore_kv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create a new session. Fails if `session_id` already exists.
    async fn create(&self, info: SessionInfo) -> Result<()>;

    /// Returns `None` on miss or TTL expiry.
    async fn get(&self, session_id: &str) -> Result<Option<SessionInfo>>;

    /// Refresh `last_activity` and the TTL.
    async fn update_activity(&self, session_id: &str, now_ms: u64) -> Result<()>;

    async fn delete(&self, session_id: &str) -> Result<()>;

    async fn list_by_worker(&self, worker_id: &str) -> Result<Vec<SessionInfo>>;

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<SessionInfo>>;

    async fn count_all(&self) -> Result<u64>;

    async fn health_check(&self) -> HealthStatus;

    /// Proactively delete sessions whose TTL has lapsed (§4.E "Worker loss",
    /// second periodic task). Backends whose storage already expires values
    /// natively (the KV-backed store's TTL) only hide expired entries lazily
    /// on read and can leave this at the default no-op; [`MemorySessionStore`]
    /// overrides it since nothing else ever removes a stale entry from its maps.
    async fn sweep_expired(&self, _now_ms: u64) -> Result<usize> {
        Ok(0)
    }
}
