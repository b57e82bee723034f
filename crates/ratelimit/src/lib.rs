//! Distributed sliding-window rate limiting (§4.B). Counters live in a
//! shared [`chatcore_kv::KVStore`] so limits hold across every worker behind
//! the load balancer; if the backend becomes unreachable the limiter falls
//! back to a local in-process window guarded by a circuit breaker, rather
//! than failing every request open or closed.

use std::{
    net::IpAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use chatcore_common::{CircuitBreaker, CircuitConfig, CircuitState};
use chatcore_kv::KVStore;
use dashmap::DashMap;

/// The classes of endpoint the limiter distinguishes, each with its own
/// budget (teacher's throttle scopes, generalized to the chat gateway).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    /// Unauthenticated or lightly-loaded HTTP endpoints.
    General,
    /// `/ws/{user_id}` chat messages.
    Chat,
    /// `POST /api/auth/login` — tightest budget, brute-force protection.
    Login,
    /// Other `/api/auth/*` endpoints (refresh, logout, me).
    AuthApi,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub general: RateLimit,
    pub chat: RateLimit,
    pub login: RateLimit,
    pub auth_api: RateLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            general: RateLimit {
                max_requests: 200,
                window: Duration::from_secs(60),
            },
            chat: RateLimit {
                max_requests: 100,
                window: Duration::from_secs(60),
            },
            login: RateLimit {
                max_requests: 5,
                window: Duration::from_secs(60),
            },
            auth_api: RateLimit {
                max_requests: 120,
                window: Duration::from_secs(60),
            },
        }
    }
}

impl RateLimitConfig {
    fn limit_for(self, class: EndpointClass) -> RateLimit {
        match class {
            EndpointClass::General => self.general,
            EndpointClass::Chat => self.chat,
            EndpointClass::Login => self.login,
            EndpointClass::AuthApi => self.auth_api,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Denied { retry_after: Duration },
}

#[derive(Clone, Copy)]
struct LocalWindow {
    started_at: Instant,
    count: u32,
}

pub struct RateLimiter {
    store: Arc<dyn KVStore>,
    config: RateLimitConfig,
    circuit: Arc<CircuitBreaker>,
    local_fallback: Arc<DashMap<(IpAddr, &'static str), LocalWindow>>,
    fallback_to_memory: bool,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn KVStore>, config: RateLimitConfig) -> Self {
        Self {
            store,
            config,
            circuit: Arc::new(CircuitBreaker::new(CircuitConfig::default())),
            local_fallback: Arc::new(DashMap::new()),
            fallback_to_memory: true,
        }
    }

    /// Override the breaker thresholds guarding the distributed backend
    /// (§6 `circuit.*`), replacing the default ones `new` installs.
    #[must_use]
    pub fn with_circuit_config(mut self, circuit: CircuitConfig) -> Self {
        self.circuit = Arc::new(CircuitBreaker::new(circuit));
        self
    }

    /// When the distributed backend is unreachable: `true` (the default)
    /// falls back to a process-local window; `false` fails closed instead,
    /// for deployments that would rather deny traffic than admit it under
    /// unlinearizable per-process counters (§4.B `fallback_to_memory`).
    #[must_use]
    pub fn with_fallback_to_memory(mut self, fallback_to_memory: bool) -> Self {
        self.fallback_to_memory = fallback_to_memory;
        self
    }

    /// Whether the distributed-backend breaker is currently tripped, for the
    /// aggregated health endpoint's "degraded" signal (§4.K).
    #[must_use]
    pub fn circuit_open(&self) -> bool {
        self.circuit.state() == CircuitState::Open
    }

    /// Evict local-fallback windows that have gone idle, so an `(ip, class)`
    /// pair that stops sending requests doesn't linger in the map forever.
    /// Meant to be driven by a periodic task on `cleanup_interval_seconds`
    /// (§4.B); the distributed backend needs no equivalent since its sorted
    /// sets already carry a TTL (`check_distributed`'s `zadd`).
    pub fn cleanup_expired_local_windows(&self) {
        let max_window = [self.config.general, self.config.chat, self.config.login, self.config.auth_api]
            .into_iter()
            .map(|limit| limit.window)
            .max()
            .unwrap_or(Duration::from_secs(60));
        let now = Instant::now();
        self.local_fallback
            .retain(|_, window| now.duration_since(window.started_at) < max_window);
    }

    /// Check and, if allowed, consume one request of budget for `identity`
    /// (typically a client IP or user id) under `class`.
    pub async fn check(&self, identity: IpAddr, class: EndpointClass) -> RateDecision {
        let limit = self.config.limit_for(class);
        if limit.max_requests == 0 {
            return RateDecision::Denied {
                retry_after: limit.window.max(Duration::from_secs(1)),
            };
        }

        if self.circuit.is_call_permitted() {
            match self.check_distributed(identity, class, limit).await {
                Ok(decision) => {
                    self.circuit.record_success();
                    return decision;
                },
                Err(error) => {
                    self.circuit.record_failure();
                    tracing::warn!(%error, "rate limiter backend unavailable");
                },
            }
        }

        if self.fallback_to_memory {
            self.check_local(identity, class, limit)
        } else {
            tracing::warn!("rate limiter backend unavailable and fallback_to_memory is false, failing closed");
            RateDecision::Denied {
                retry_after: limit.window.max(Duration::from_secs(1)),
            }
        }
    }

    /// Sliding-window admission over the `KVStore`'s sorted-set primitives
    /// (§4.B steps 1-5): evict timestamps older than the window, count what
    /// remains, and admit only if under the limit, inserting a uniquely
    /// named member so concurrent admits from other workers never collide.
    async fn check_distributed(
        &self,
        identity: IpAddr,
        class: EndpointClass,
        limit: RateLimit,
    ) -> chatcore_kv::Result<RateDecision> {
        let key = format!("ratelimit:{}:{identity}", class_key(class));
        let now = chatcore_common::now_millis() as i64;
        let window_ms = limit.window.as_millis() as i64;
        let min_score = now - window_ms;

        self.store.zremrange_by_score(&key, i64::MIN, min_score).await?;
        let count = self.store.zcard(&key).await?;

        if count >= u64::from(limit.max_requests) {
            let oldest = self.store.zrange_by_score(&key, i64::MIN, i64::MAX).await?;
            let retry_after = oldest
                .first()
                .map(|(_, score)| {
                    let elapsed_ms = (now - score).max(0);
                    Duration::from_millis(window_ms.saturating_sub(elapsed_ms).max(0) as u64)
                })
                .unwrap_or(limit.window);
            return Ok(RateDecision::Denied { retry_after });
        }

        let member = uuid::Uuid::new_v4().to_string();
        self.store
            .zadd(&key, now, &member, Some(limit.window + Duration::from_secs(60)))
            .await?;
        Ok(RateDecision::Allowed)
    }

    fn check_local(&self, identity: IpAddr, class: EndpointClass, limit: RateLimit) -> RateDecision {
        let now = Instant::now();
        let key = (identity, class_key(class));
        let mut entry = self
            .local_fallback
            .entry(key)
            .or_insert(LocalWindow {
                started_at: now,
                count: 0,
            });

        let elapsed = now.duration_since(entry.started_at);
        if elapsed >= limit.window {
            entry.started_at = now;
            entry.count = 1;
            return RateDecision::Allowed;
        }
        if entry.count < limit.max_requests {
            entry.count += 1;
            return RateDecision::Allowed;
        }
        RateDecision::Denied {
            retry_after: limit.window.saturating_sub(elapsed),
        }
    }
}

fn class_key(class: EndpointClass) -> &'static str {
    match class {
        EndpointClass::General => "general",
        EndpointClass::Chat => "chat",
        EndpointClass::Login => "login",
        EndpointClass::AuthApi => "auth_api",
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use chatcore_kv::MemoryKv;

    use super::*;

    fn test_ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn tight_config() -> RateLimitConfig {
        let tight = RateLimit {
            max_requests: 2,
            window: Duration::from_secs(10),
        };
        RateLimitConfig {
            general: tight,
            chat: tight,
            login: tight,
            auth_api: tight,
        }
    }

    #[tokio::test]
    async fn allows_up_to_the_limit_then_denies() {
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()), tight_config());
        assert_eq!(
            limiter.check(test_ip(), EndpointClass::Login).await,
            RateDecision::Allowed
        );
        assert_eq!(
            limiter.check(test_ip(), EndpointClass::Login).await,
            RateDecision::Allowed
        );
        assert!(matches!(
            limiter.check(test_ip(), EndpointClass::Login).await,
            RateDecision::Denied { .. }
        ));
    }

    #[tokio::test]
    async fn different_classes_have_independent_budgets() {
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()), tight_config());
        limiter.check(test_ip(), EndpointClass::Login).await;
        limiter.check(test_ip(), EndpointClass::Login).await;
        assert_eq!(
            limiter.check(test_ip(), EndpointClass::Chat).await,
            RateDecision::Allowed
        );
    }

    #[tokio::test]
    async fn different_identities_have_independent_budgets() {
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()), tight_config());
        limiter.check(test_ip(), EndpointClass::Login).await;
        limiter.check(test_ip(), EndpointClass::Login).await;
        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(
            limiter.check(other, EndpointClass::Login).await,
            RateDecision::Allowed
        );
    }

    #[tokio::test]
    async fn zero_budget_always_denies() {
        let mut config = tight_config();
        config.login.max_requests = 0;
        let limiter = RateLimiter::new(Arc::new(MemoryKv::new()), config);
        assert!(matches!(
            limiter.check(test_ip(), EndpointClass::Login).await,
            RateDecision::Denied { .. }
        ));
    }

    struct UnreachableKv;

    #[async_trait::async_trait]
    impl KVStore for UnreachableKv {
        async fn get(&self, _key: &str) -> chatcore_kv::Result<Option<Vec<u8>>> {
            Err(chatcore_kv::Error::Message("unreachable".to_string()))
        }
        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> chatcore_kv::Result<()> {
            Err(chatcore_kv::Error::Message("unreachable".to_string()))
        }
        async fn delete(&self, _key: &str) -> chatcore_kv::Result<()> {
            Err(chatcore_kv::Error::Message("unreachable".to_string()))
        }
        async fn compare_and_swap(
            &self,
            _key: &str,
            _expected: Option<Vec<u8>>,
            _new: Vec<u8>,
            _ttl: Option<Duration>,
        ) -> chatcore_kv::Result<bool> {
            Err(chatcore_kv::Error::Message("unreachable".to_string()))
        }
        async fn zadd(&self, _key: &str, _score: i64, _member: &str, _ttl: Option<Duration>) -> chatcore_kv::Result<()> {
            Err(chatcore_kv::Error::Message("unreachable".to_string()))
        }
        async fn zrange_by_score(&self, _key: &str, _min: i64, _max: i64) -> chatcore_kv::Result<Vec<(String, i64)>> {
            Err(chatcore_kv::Error::Message("unreachable".to_string()))
        }
        async fn zremrange_by_score(&self, _key: &str, _min: i64, _max: i64) -> chatcore_kv::Result<u64> {
            Err(chatcore_kv::Error::Message("unreachable".to_string()))
        }
        async fn zcard(&self, _key: &str) -> chatcore_kv::Result<u64> {
            Err(chatcore_kv::Error::Message("unreachable".to_string()))
        }
    }

    #[tokio::test]
    async fn fallback_to_memory_false_fails_closed_when_backend_unreachable() {
        let limiter =
            RateLimiter::new(Arc::new(UnreachableKv), tight_config()).with_fallback_to_memory(false);
        assert!(matches!(
            limiter.check(test_ip(), EndpointClass::Login).await,
            RateDecision::Denied { .. }
        ));
    }

    #[tokio::test]
    async fn fallback_to_memory_true_admits_via_local_window_when_backend_unreachable() {
        let limiter =
            RateLimiter::new(Arc::new(UnreachableKv), tight_config()).with_fallback_to_memory(true);
        assert_eq!(
            limiter.check(test_ip(), EndpointClass::Login).await,
            RateDecision::Allowed
        );
    }
}
