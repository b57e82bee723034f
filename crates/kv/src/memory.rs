use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::{KVStore, Result};

const SWEEP_EVERY_WRITES: u64 = 256;

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| now >= deadline)
    }
}

struct ZsetEntry {
    members: Vec<(i64, String)>,
    expires_at: Option<Instant>,
}

/// In-process key-value store for single-worker deployments or tests. Not
/// shared across workers; the distributed `KVStore` implementation is
/// [`crate::sqlx_store::SqlxKv`].
#[derive(Clone)]
pub struct MemoryKv {
    entries: Arc<DashMap<String, Entry>>,
    zsets: Arc<DashMap<String, ZsetEntry>>,
    writes_seen: Arc<std::sync::atomic::AtomicU64>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            zsets: Arc::new(DashMap::new()),
            writes_seen: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    fn sweep_if_due(&self) {
        let seen = self
            .writes_seen
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        if !seen.is_multiple_of(SWEEP_EVERY_WRITES) {
            return;
        }
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        self.zsets.retain(|_, entry| {
            !entry
                .expires_at
                .is_some_and(|deadline| now >= deadline)
        });
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KVStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Ok(Some(entry.value.clone())),
            _ => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        self.sweep_if_due();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut slot = self.entries.entry(key.to_string());
        let current = match &slot {
            dashmap::mapref::entry::Entry::Occupied(occupied) => {
                let entry = occupied.get();
                if entry.is_expired(now) {
                    None
                } else {
                    Some(entry.value.clone())
                }
            },
            dashmap::mapref::entry::Entry::Vacant(_) => None,
        };

        if current != expected {
            return Ok(false);
        }

        slot.insert(Entry {
            value: new,
            expires_at: ttl.map(|d| now + d),
        });
        Ok(true)
    }

    async fn zadd(&self, key: &str, score: i64, member: &str, ttl: Option<Duration>) -> Result<()> {
        let now = Instant::now();
        let mut slot = self.zsets.entry(key.to_string()).or_insert_with(|| ZsetEntry {
            members: Vec::new(),
            expires_at: None,
        });
        slot.members.retain(|(_, m)| m != member);
        slot.members.push((score, member.to_string()));
        if let Some(ttl) = ttl {
            slot.expires_at = Some(now + ttl);
        }
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<Vec<(String, i64)>> {
        let now = Instant::now();
        let Some(slot) = self.zsets.get(key) else {
            return Ok(Vec::new());
        };
        if slot.expires_at.is_some_and(|deadline| now >= deadline) {
            return Ok(Vec::new());
        }
        let mut matched: Vec<(String, i64)> = slot
            .members
            .iter()
            .filter(|(score, _)| *score >= min && *score <= max)
            .map(|(score, member)| (member.clone(), *score))
            .collect();
        matched.sort_by_key(|(_, score)| *score);
        Ok(matched)
    }

    async fn zremrange_by_score(&self, key: &str, min: i64, max: i64) -> Result<u64> {
        let Some(mut slot) = self.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = slot.members.len();
        slot.members.retain(|(score, _)| *score < min || *score > max);
        Ok((before - slot.members.len()) as u64)
    }

    async fn zcard(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let Some(slot) = self.zsets.get(key) else {
            return Ok(0);
        };
        if slot.expires_at.is_some_and(|deadline| now >= deadline) {
            return Ok(0);
        }
        Ok(slot.members.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let kv = MemoryKv::new();
        kv.set("k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entry_reads_as_missing() {
        let kv = MemoryKv::new();
        kv.set("k", b"v".to_vec(), Some(Duration::from_millis(0)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let kv = MemoryKv::new();
        kv.set("k", b"v".to_vec(), None).await.unwrap();
        kv.delete("k").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cas_succeeds_when_expected_matches() {
        let kv = MemoryKv::new();
        kv.set("k", b"old".to_vec(), None).await.unwrap();
        let swapped = kv
            .compare_and_swap("k", Some(b"old".to_vec()), b"new".to_vec(), None)
            .await
            .unwrap();
        assert!(swapped);
        assert_eq!(kv.get("k").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn cas_fails_when_expected_does_not_match() {
        let kv = MemoryKv::new();
        kv.set("k", b"old".to_vec(), None).await.unwrap();
        let swapped = kv
            .compare_and_swap("k", Some(b"wrong".to_vec()), b"new".to_vec(), None)
            .await
            .unwrap();
        assert!(!swapped);
        assert_eq!(kv.get("k").await.unwrap(), Some(b"old".to_vec()));
    }

    #[tokio::test]
    async fn cas_on_absent_key_requires_expected_none() {
        let kv = MemoryKv::new();
        let swapped = kv
            .compare_and_swap("k", None, b"new".to_vec(), None)
            .await
            .unwrap();
        assert!(swapped);
        assert_eq!(kv.get("k").await.unwrap(), Some(b"new".to_vec()));
    }

    #[tokio::test]
    async fn zadd_then_zcard_counts_members() {
        let kv = MemoryKv::new();
        kv.zadd("z", 10, "a", None).await.unwrap();
        kv.zadd("z", 20, "b", None).await.unwrap();
        assert_eq!(kv.zcard("z").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn zadd_with_same_member_replaces_score() {
        let kv = MemoryKv::new();
        kv.zadd("z", 10, "a", None).await.unwrap();
        kv.zadd("z", 99, "a", None).await.unwrap();
        assert_eq!(kv.zcard("z").await.unwrap(), 1);
        let range = kv.zrange_by_score("z", i64::MIN, i64::MAX).await.unwrap();
        assert_eq!(range, vec![("a".to_string(), 99)]);
    }

    #[tokio::test]
    async fn zremrange_by_score_evicts_stale_members() {
        let kv = MemoryKv::new();
        kv.zadd("z", 10, "a", None).await.unwrap();
        kv.zadd("z", 20, "b", None).await.unwrap();
        kv.zadd("z", 30, "c", None).await.unwrap();
        let removed = kv.zremrange_by_score("z", i64::MIN, 20).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(kv.zcard("z").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn zrange_by_score_is_ordered_ascending() {
        let kv = MemoryKv::new();
        kv.zadd("z", 30, "c", None).await.unwrap();
        kv.zadd("z", 10, "a", None).await.unwrap();
        kv.zadd("z", 20, "b", None).await.unwrap();
        let range = kv.zrange_by_score("z", i64::MIN, i64::MAX).await.unwrap();
        assert_eq!(
            range,
            vec![
                ("a".to_string(), 10),
                ("b".to_string(), 20),
                ("c".to_string(), 30)
            ]
        );
    }
}
