use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{DEFAULT_SESSION_TTL, Error, HealthStatus, Result, SessionInfo, SessionStore};

#[derive(Default)]
struct State {
    sessions: HashMap<String, SessionInfo>,
    by_worker: HashMap<String, HashSet<String>>,
    by_user: HashMap<String, HashSet<String>>,
}

/// Single-process `SessionStore`, matching the teacher's single-writer-lock
/// style for its in-memory maps: one [`RwLock`] guards the session table and
/// both secondary indexes together, so a reader never observes a session
/// listed in an index but missing from the table.
pub struct MemorySessionStore {
    state: RwLock<State>,
    ttl: Duration,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self {
            state: RwLock::default(),
            ttl: DEFAULT_SESSION_TTL,
        }
    }
}

impl MemorySessionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, info: SessionInfo) -> Result<()> {
        let mut state = self.state.write().await;
        if state.sessions.contains_key(&info.session_id) {
            return Err(Error::AlreadyExists(info.session_id));
        }
        state
            .by_worker
            .entry(info.worker_id.clone())
            .or_default()
            .insert(info.session_id.clone());
        state
            .by_user
            .entry(info.user_id.clone())
            .or_default()
            .insert(info.session_id.clone());
        state.sessions.insert(info.session_id.clone(), info);
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<SessionInfo>> {
        let state = self.state.read().await;
        let Some(info) = state.sessions.get(session_id) else {
            return Ok(None);
        };
        let now = chatcore_common::now_millis();
        if info.is_expired(now, self.ttl) {
            return Ok(None);
        }
        Ok(Some(info.clone()))
    }

    async fn update_activity(&self, session_id: &str, now_ms: u64) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(info) = state.sessions.get_mut(session_id) {
            info.last_activity_ms = now_ms;
        }
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(info) = state.sessions.remove(session_id) {
            if let Some(members) = state.by_worker.get_mut(&info.worker_id) {
                members.remove(session_id);
                if members.is_empty() {
                    state.by_worker.remove(&info.worker_id);
                }
            }
            if let Some(members) = state.by_user.get_mut(&info.user_id) {
                members.remove(session_id);
                if members.is_empty() {
                    state.by_user.remove(&info.user_id);
                }
            }
        }
        Ok(())
    }

    async fn list_by_worker(&self, worker_id: &str) -> Result<Vec<SessionInfo>> {
        let state = self.state.read().await;
        Ok(state
            .by_worker
            .get(worker_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.sessions.get(id).cloned())
            .collect())
    }

    async fn list_by_user(&self, user_id: &str) -> Result<Vec<SessionInfo>> {
        let state = self.state.read().await;
        Ok(state
            .by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.sessions.get(id).cloned())
            .collect())
    }

    async fn count_all(&self) -> Result<u64> {
        let state = self.state.read().await;
        Ok(state.sessions.len() as u64)
    }

    async fn health_check(&self) -> HealthStatus {
        let started = std::time::Instant::now();
        let _ = self.state.read().await;
        HealthStatus {
            healthy: true,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    async fn sweep_expired(&self, now_ms: u64) -> Result<usize> {
        let ttl = self.ttl;
        let mut state = self.state.write().await;
        let expired: Vec<String> = state
            .sessions
            .iter()
            .filter(|(_, info)| info.is_expired(now_ms, ttl))
            .map(|(id, _)| id.clone())
            .collect();
        for session_id in &expired {
            if let Some(info) = state.sessions.remove(session_id) {
                if let Some(members) = state.by_worker.get_mut(&info.worker_id) {
                    members.remove(session_id);
                    if members.is_empty() {
                        state.by_worker.remove(&info.worker_id);
                    }
                }
                if let Some(members) = state.by_user.get_mut(&info.user_id) {
                    members.remove(session_id);
                    if members.is_empty() {
                        state.by_user.remove(&info.user_id);
                    }
                }
            }
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let store = MemorySessionStore::new();
        store.create(SessionInfo::new("s1", "u1", "w1")).await.unwrap();
        let fetched = store.get("s1").await.unwrap().unwrap();
        assert_eq!(fetched.user_id, "u1");
    }

    #[tokio::test]
    async fn create_twice_fails() {
        let store = MemorySessionStore::new();
        store.create(SessionInfo::new("s1", "u1", "w1")).await.unwrap();
        let err = store.create(SessionInfo::new("s1", "u2", "w1")).await;
        assert!(matches!(err, Err(Error::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn delete_cleans_up_both_indexes() {
        let store = MemorySessionStore::new();
        store.create(SessionInfo::new("s1", "u1", "w1")).await.unwrap();
        store.delete("s1").await.unwrap();
        assert!(store.list_by_worker("w1").await.unwrap().is_empty());
        assert!(store.list_by_user("u1").await.unwrap().is_empty());
        assert_eq!(store.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expired_sessions_are_hidden_from_get() {
        let store = MemorySessionStore::new();
        let mut info = SessionInfo::new("s1", "u1", "w1");
        info.last_activity_ms = 0;
        store.create(info).await.unwrap();
        assert!(store.get("s1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_expired_removes_stale_entries_from_both_indexes() {
        let store = MemorySessionStore::new();
        let mut info = SessionInfo::new("s1", "u1", "w1");
        info.last_activity_ms = 0;
        store.create(info).await.unwrap();
        store.create(SessionInfo::new("s2", "u2", "w1")).await.unwrap();

        let removed = store.sweep_expired(chatcore_common::now_millis()).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.list_by_worker("w1").await.unwrap().len(), 1);
        assert_eq!(store.count_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_by_worker_reflects_multiple_sessions() {
        let store = MemorySessionStore::new();
        store.create(SessionInfo::new("s1", "u1", "w1")).await.unwrap();
        store.create(SessionInfo::new("s2", "u2", "w1")).await.unwrap();
        assert_eq!(store.list_by_worker("w1").await.unwrap().len(), 2);
    }
}
