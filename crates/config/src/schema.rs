//! Root configuration schema (§6, §1.1): every tunable the core recognizes,
//! grouped by the subsystem that reads it. Corresponds to the teacher's
//! `MoltisConfig` / `types.ts` schema, trimmed and re-keyed for the chat core.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Root configuration loaded from `chatcore.toml`/`.yaml`/`.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatCoreConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub auth: AuthConfig,
    pub response_cache: ResponseCacheConfig,
    pub pipeline: PipelineConfig,
    pub circuit: CircuitConfig,
    pub ws: WsConfig,
    pub cors: CorsConfig,
}

impl Default for ChatCoreConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
            response_cache: ResponseCacheConfig::default(),
            pipeline: PipelineConfig::default(),
            circuit: CircuitConfig::default(),
            ws: WsConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

impl ChatCoreConfig {
    /// `production` gates the startup refusals in §4.K / §9: wildcard CORS,
    /// a missing/weak signing key, or a missing refresh pepper are fatal
    /// only once this is true.
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.server.production
    }
}

/// `[server]` — bind address, worker identity, shutdown behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Forces production safety checks in `validate` (no wildcard CORS, a
    /// non-empty signing key, `Secure` cookies, HSTS).
    pub production: bool,
    /// Globally unique worker identifier; auto-generated (`host+pid+random`)
    /// when unset (§4.E).
    pub worker_id: Option<String>,
    pub shutdown_grace_seconds: u64,
    /// Emit verbose per-request HTTP access logs (debugging only).
    pub http_request_logs: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            production: false,
            worker_id: None,
            shutdown_grace_seconds: 10,
            http_request_logs: false,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

/// `[session]` — SessionStore TTL (§4.C).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub session_ttl_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_seconds: 3600,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_seconds)
    }
}

/// `[rate_limit]` — sliding-window admission control (§4.B).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_seconds: u64,
    pub general_per_window: u32,
    pub chat_per_window: u32,
    pub login_per_window: u32,
    pub auth_api_per_window: u32,
    /// Route rate-limit state through the distributed `KVStore` rather than
    /// a per-process window only.
    pub use_distributed: bool,
    /// When the distributed backend is unavailable, fall back to a local
    /// in-process window instead of failing closed.
    pub fallback_to_memory: bool,
    pub cleanup_interval_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            general_per_window: 200,
            chat_per_window: 100,
            login_per_window: 5,
            auth_api_per_window: 120,
            use_distributed: true,
            fallback_to_memory: true,
            cleanup_interval_seconds: 300,
        }
    }
}

impl RateLimitConfig {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// `[auth]` — token lifetimes and brute-force protection (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub access_token_ttl_seconds: u64,
    pub refresh_token_ttl_seconds: u64,
    /// Failed `(ip, username)` logins within the login rate-limit window
    /// before the IP is added to the block list.
    pub max_login_failures: u32,
    pub block_duration_seconds: u64,
    /// HMAC-SHA256 signing key for access tokens. Required (non-empty) in
    /// production (§9 Open Question resolution). Never serialized back out
    /// (`secrecy::SecretString` has no `Serialize` impl by design).
    #[serde(skip_serializing)]
    pub signing_key: Option<SecretString>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token_ttl_seconds: 900,
            refresh_token_ttl_seconds: 604_800,
            max_login_failures: 5,
            block_duration_seconds: 900,
            signing_key: None,
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_seconds)
    }

    #[must_use]
    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_seconds)
    }

    #[must_use]
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_seconds)
    }
}

/// `[response_cache]` — fingerprinted reply cache (§4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseCacheConfig {
    pub ttl_seconds: u64,
    pub capacity: usize,
    /// Share cache entries across workers via the `KVStore` (§9 Open
    /// Question: kept config-gated, default local-only).
    pub shared: bool,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: 600,
            capacity: 1000,
            shared: false,
        }
    }
}

impl ResponseCacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// `[pipeline]` — per-stage thresholds for the matcher stack (§4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub stage1_threshold: f32,
    pub stage2_threshold: f32,
    pub stage2_alpha: f32,
    pub stage2_beta: f32,
    pub stage2_gamma: f32,
    pub stage3_cosine_min: f32,
    pub stage3_margin: f32,
    pub stage3_override: f32,
    pub stage3_top_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage1_threshold: 0.6,
            stage2_threshold: 0.55,
            stage2_alpha: 0.5,
            stage2_beta: 0.3,
            stage2_gamma: 0.2,
            stage3_cosine_min: 0.72,
            stage3_margin: 0.05,
            stage3_override: 0.85,
            stage3_top_k: 5,
        }
    }
}

/// `[circuit]` — breaker thresholds shared by Generator/VectorIndex/KVStore.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub open_duration_seconds: u64,
    pub success_threshold: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration_seconds: 30,
            success_threshold: 1,
        }
    }
}

impl From<CircuitConfig> for chatcore_common::CircuitConfig {
    fn from(value: CircuitConfig) -> Self {
        Self {
            failure_threshold: value.failure_threshold,
            open_duration: Duration::from_secs(value.open_duration_seconds),
            success_threshold: value.success_threshold,
        }
    }
}

/// `[ws]` — WebSocket frame and connection limits (§4.E).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WsConfig {
    pub max_frame_bytes: usize,
    pub idle_seconds: u64,
    pub pong_timeout_seconds: u64,
    pub send_queue_capacity: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 65_536,
            idle_seconds: 30,
            pong_timeout_seconds: 10,
            send_queue_capacity: 64,
        }
    }
}

impl WsConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_seconds)
    }

    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_seconds)
    }
}

/// `[cors]` — allowed origins (§4.K: wildcard forbidden in production).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// `["*"]` is only valid when `server.production = false`.
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["*".to_string()],
        }
    }
}

impl CorsConfig {
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == "*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let cfg = ChatCoreConfig::default();
        let toml_str = toml::to_string(&cfg).unwrap();
        let decoded: ChatCoreConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(decoded.rate_limit.chat_per_window, cfg.rate_limit.chat_per_window);
    }

    #[test]
    fn default_cors_is_wildcard() {
        assert!(CorsConfig::default().is_wildcard());
    }
}
