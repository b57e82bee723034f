//! `ResponseCache` (§4.G): fingerprinted reply cache with in-flight
//! deduplication. Exactly one caller per fingerprint runs the (expensive)
//! compute closure; every concurrent caller for the same fingerprint awaits
//! its result instead of repeating the work.
//!
//! The in-flight lock is always local to this worker (§4.G "Consistency" —
//! cross-worker deduplication is explicitly not a goal). Cross-worker
//! *sharing* of completed entries is a separate, optional concern gated by
//! [`ResponseCacheConfig::shared`] and backed by a [`chatcore_kv::KVStore`].

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use chatcore_kv::KVStore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy)]
pub struct ResponseCacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
    /// When true, completed entries are also written to a shared
    /// [`KVStore`] so other workers can serve a hit without recomputing.
    pub shared: bool,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            capacity: 1000,
            shared: false,
        }
    }
}

/// A cached reply (§4.G). Round-trips through `serde_json` exactly (§8
/// property 7) when persisted to a shared `KVStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseCacheEntry {
    pub reply: String,
    pub source_tag: String,
    pub confidence: f32,
    pub created_at_ms: u64,
}

/// `fingerprint(user_message, locale, user_role)` (§4.G): lowercase, trim,
/// collapse whitespace, then hash the three fields together.
#[must_use]
pub fn fingerprint(user_message: &str, locale: &str, user_role: &str) -> String {
    let normalized = normalize(user_message);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b":");
    hasher.update(locale.as_bytes());
    hasher.update(b":");
    hasher.update(user_role.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn normalize(message: &str) -> String {
    message.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

enum Slot {
    Pending(broadcast::Sender<Result<ResponseCacheEntry, String>>),
    Ready { entry: ResponseCacheEntry, expires_at_ms: u64 },
}

struct Inner {
    slots: std::collections::HashMap<String, Slot>,
    lru: VecDeque<String>,
}

pub struct ResponseCache {
    inner: Mutex<Inner>,
    config: ResponseCacheConfig,
    shared_store: Option<Arc<dyn KVStore>>,
}

impl ResponseCache {
    #[must_use]
    pub fn new(config: ResponseCacheConfig, shared_store: Option<Arc<dyn KVStore>>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: std::collections::HashMap::new(),
                lru: VecDeque::new(),
            }),
            config,
            shared_store,
        }
    }

    /// Look up `fingerprint`; on a miss, run `compute` exactly once among
    /// every concurrent caller racing for the same key (§4.G).
    pub async fn get_or_compute<F, Fut>(&self, fingerprint: &str, compute: F) -> Result<ResponseCacheEntry, String>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<ResponseCacheEntry, String>>,
    {
        let now = chatcore_common::now_millis();

        enum Role {
            Owner,
            Waiter(broadcast::Receiver<Result<ResponseCacheEntry, String>>),
            Hit(ResponseCacheEntry),
        }

        let role = {
            let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
            match inner.slots.get(fingerprint) {
                Some(Slot::Ready { entry, expires_at_ms }) if *expires_at_ms > now => {
                    let entry = entry.clone();
                    touch_lru(&mut inner.lru, fingerprint);
                    Role::Hit(entry)
                },
                Some(Slot::Pending(sender)) => Role::Waiter(sender.subscribe()),
                _ => {
                    let (sender, _receiver) = broadcast::channel(1);
                    inner.slots.insert(fingerprint.to_string(), Slot::Pending(sender));
                    touch_lru(&mut inner.lru, fingerprint);
                    Role::Owner
                },
            }
        };

        match role {
            Role::Hit(entry) => {
                metrics::counter!(chatcore_metrics::cache::HITS_TOTAL).increment(1);
                Ok(entry)
            },
            Role::Waiter(mut receiver) => {
                metrics::counter!(chatcore_metrics::cache::DEDUPED_TOTAL).increment(1);
                match receiver.recv().await {
                    Ok(result) => result,
                    // The owner's sender was dropped without a broadcast (a
                    // panic mid-compute); fall through and retry as a fresh
                    // owner rather than hang forever.
                    Err(_) => Box::pin(self.get_or_compute(fingerprint, compute)).await,
                }
            },
            Role::Owner => {
                metrics::counter!(chatcore_metrics::cache::MISSES_TOTAL).increment(1);
                let result = compute().await;
                self.resolve(fingerprint, result.clone(), now).await;
                result
            },
        }
    }

    async fn resolve(&self, fingerprint: &str, result: Result<ResponseCacheEntry, String>, now_ms: u64) {
        let sender = {
            let mut inner = self.inner.lock().unwrap_or_else(|poison| poison.into_inner());
            let previous = inner.slots.remove(fingerprint);
            match &result {
                Ok(entry) => {
                    inner.slots.insert(
                        fingerprint.to_string(),
                        Slot::Ready {
                            entry: entry.clone(),
                            expires_at_ms: now_ms + self.config.ttl.as_millis() as u64,
                        },
                    );
                    evict_if_needed(&mut inner, self.config.capacity);
                },
                Err(_) => {
                    // Owner failed: clear the pending marker entirely so the
                    // next caller retries the computation (§4.G).
                },
            }
            match previous {
                Some(Slot::Pending(sender)) => Some(sender),
                _ => None,
            }
        };

        if let Some(sender) = sender {
            let _ = sender.send(result.clone());
        }

        if let (Ok(entry), true, Some(store)) = (&result, self.config.shared, &self.shared_store)
            && let Ok(bytes) = serde_json::to_vec(entry)
        {
            let _ = store.set(&shared_key(fingerprint), bytes, Some(self.config.ttl)).await;
        }
    }

    /// Consult the shared store directly, bypassing the local in-flight
    /// machinery. Used as a fast path before falling back to
    /// [`get_or_compute`] when cross-worker sharing is enabled.
    pub async fn shared_lookup(&self, fingerprint: &str) -> Option<ResponseCacheEntry> {
        if !self.config.shared {
            return None;
        }
        let store = self.shared_store.as_ref()?;
        let bytes = store.get(&shared_key(fingerprint)).await.ok()??;
        serde_json::from_slice(&bytes).ok()
    }
}

fn shared_key(fingerprint: &str) -> String {
    format!("cache:reply:{fingerprint}")
}

fn touch_lru(lru: &mut VecDeque<String>, key: &str) {
    lru.retain(|existing| existing != key);
    lru.push_back(key.to_string());
}

fn evict_if_needed(inner: &mut Inner, capacity: usize) {
    while inner.slots.len() > capacity {
        let Some(oldest) = inner.lru.pop_front() else { break };
        if matches!(inner.slots.get(&oldest), Some(Slot::Ready { .. })) {
            inner.slots.remove(&oldest);
            metrics::counter!(chatcore_metrics::cache::EVICTIONS_TOTAL).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn entry(reply: &str) -> ResponseCacheEntry {
        ResponseCacheEntry {
            reply: reply.to_string(),
            source_tag: "static".to_string(),
            confidence: 1.0,
            created_at_ms: 0,
        }
    }

    #[test]
    fn fingerprint_ignores_whitespace_and_case() {
        let a = fingerprint("Hello   World", "en", "user");
        let b = fingerprint("hello world", "en", "user");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_distinguishes_locale_and_role() {
        let a = fingerprint("hi", "en", "user");
        let b = fingerprint("hi", "tr", "user");
        let c = fingerprint("hi", "en", "admin");
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn a_hit_skips_recomputation() {
        let cache = ResponseCache::new(ResponseCacheConfig::default(), None);
        let calls = Arc::new(AtomicUsize::new(0));

        let calls_clone = Arc::clone(&calls);
        cache
            .get_or_compute("fp", || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(entry("first"))
            })
            .await
            .unwrap();

        let calls_clone = Arc::clone(&calls);
        let result = cache
            .get_or_compute("fp", || async move {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                Ok(entry("second"))
            })
            .await
            .unwrap();

        assert_eq!(result.reply, "first");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_misses_for_the_same_key_compute_once() {
        let cache = Arc::new(ResponseCache::new(ResponseCacheConfig::default(), None));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared-fp", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(entry("computed"))
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().reply, "computed");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_failed_owner_lets_the_next_caller_retry() {
        let cache = ResponseCache::new(ResponseCacheConfig::default(), None);

        let err = cache
            .get_or_compute("fp", || async { Err("boom".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");

        let result = cache.get_or_compute("fp", || async { Ok(entry("recovered")) }).await.unwrap();
        assert_eq!(result.reply, "recovered");
    }

    #[tokio::test]
    async fn eviction_respects_capacity() {
        let config = ResponseCacheConfig {
            capacity: 2,
            ..ResponseCacheConfig::default()
        };
        let cache = ResponseCache::new(config, None);

        for key in ["a", "b", "c"] {
            cache.get_or_compute(key, || async move { Ok(entry(key)) }).await.unwrap();
        }

        let inner = cache.inner.lock().unwrap();
        assert!(inner.slots.len() <= 2);
    }
}
