//! Shared application state handed to every handler and middleware layer.

use std::{sync::Arc, time::Instant};

use chatcore_auth::AuthService;
use chatcore_broker::MessageBroker;
use chatcore_config::ChatCoreConfig;
use chatcore_hub::ConnectionHub;
use chatcore_metrics::MetricsHandle;
use chatcore_orchestrator::ChatOrchestrator;
use chatcore_ratelimit::RateLimiter;

use crate::user_directory::UserDirectory;

/// Everything a gateway handler needs, cloned cheaply behind `Arc`s.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ChatCoreConfig>,
    pub worker_id: String,
    pub hub: Arc<ConnectionHub>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub auth: Arc<AuthService>,
    /// Admission control for `/api/*` traffic, separate from the chat-specific
    /// limiter the orchestrator already applies to `handle()` (§4.B).
    pub http_rate_limiter: Arc<RateLimiter>,
    pub user_directory: Arc<UserDirectory>,
    pub broker: Arc<MessageBroker>,
    pub metrics_handle: MetricsHandle,
    pub started_at: Instant,
}

impl AppState {
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
