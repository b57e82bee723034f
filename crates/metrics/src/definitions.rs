//! Metric name and label definitions.
//!
//! This module defines all metric names and common label keys used throughout
//! the chat core. Centralizing these definitions ensures consistency and makes
//! it easier to document what metrics are available.

/// HTTP request metrics
pub mod http {
    /// Total number of HTTP requests handled
    pub const REQUESTS_TOTAL: &str = "chatcore_http_requests_total";
    /// Duration of HTTP requests in seconds
    pub const REQUEST_DURATION_SECONDS: &str = "chatcore_http_request_duration_seconds";
    /// Number of currently in-flight HTTP requests
    pub const REQUESTS_IN_FLIGHT: &str = "chatcore_http_requests_in_flight";
    /// Total bytes received in HTTP requests
    pub const REQUEST_BYTES_TOTAL: &str = "chatcore_http_request_bytes_total";
    /// Total bytes sent in HTTP responses
    pub const RESPONSE_BYTES_TOTAL: &str = "chatcore_http_response_bytes_total";
}

/// WebSocket connection and frame metrics
pub mod ws {
    /// Total number of WebSocket connections established
    pub const CONNECTIONS_TOTAL: &str = "chatcore_ws_connections_total";
    /// Number of currently active WebSocket connections
    pub const CONNECTIONS_ACTIVE: &str = "chatcore_ws_connections_active";
    /// Total number of WebSocket messages received
    pub const MESSAGES_RECEIVED_TOTAL: &str = "chatcore_ws_messages_received_total";
    /// Total number of WebSocket messages sent
    pub const MESSAGES_SENT_TOTAL: &str = "chatcore_ws_messages_sent_total";
    /// WebSocket message processing duration in seconds
    pub const MESSAGE_DURATION_SECONDS: &str = "chatcore_ws_message_duration_seconds";
    /// Connections closed for backpressure (send queue full twice)
    pub const BACKPRESSURE_CLOSES_TOTAL: &str = "chatcore_ws_backpressure_closes_total";
    /// Handshake timeouts
    pub const HANDSHAKE_TIMEOUTS_TOTAL: &str = "chatcore_ws_handshake_timeouts_total";
}

/// Session metrics
pub mod session {
    /// Total number of sessions created
    pub const CREATED_TOTAL: &str = "chatcore_sessions_created_total";
    /// Number of currently active sessions
    pub const ACTIVE: &str = "chatcore_sessions_active";
    /// Total number of messages in sessions
    pub const MESSAGES_TOTAL: &str = "chatcore_session_messages_total";
    /// Session duration in seconds
    pub const DURATION_SECONDS: &str = "chatcore_session_duration_seconds";
}

/// Chat message metrics
pub mod chat {
    /// Total number of chat messages sent
    pub const MESSAGES_SENT_TOTAL: &str = "chatcore_chat_messages_sent_total";
    /// Total number of chat messages received
    pub const MESSAGES_RECEIVED_TOTAL: &str = "chatcore_chat_messages_received_total";
    /// Chat message processing duration in seconds (full orchestrator handle())
    pub const PROCESSING_DURATION_SECONDS: &str = "chatcore_chat_processing_duration_seconds";
}

/// Rate limiter admission metrics
pub mod rate_limit {
    /// Requests admitted, labelled by endpoint class
    pub const ADMITTED_TOTAL: &str = "chatcore_rate_limit_admitted_total";
    /// Requests denied, labelled by endpoint class
    pub const DENIED_TOTAL: &str = "chatcore_rate_limit_denied_total";
    /// Times the distributed check fell back to the local in-memory limiter
    pub const FALLBACK_TOTAL: &str = "chatcore_rate_limit_fallback_total";
}

/// Matcher pipeline metrics, one series per stage (§4.H)
pub mod pipeline {
    /// Matches resolved at a given stage, labelled by `stage` and `source`
    pub const STAGE_MATCHES_TOTAL: &str = "chatcore_pipeline_stage_matches_total";
    /// Stage evaluation duration in seconds, labelled by `stage`
    pub const STAGE_DURATION_SECONDS: &str = "chatcore_pipeline_stage_duration_seconds";
    /// Requests that fell through to the generator fallback
    pub const FALLBACK_TOTAL: &str = "chatcore_pipeline_fallback_total";
}

/// Response cache metrics (§4.G)
pub mod cache {
    /// Cache hits
    pub const HITS_TOTAL: &str = "chatcore_cache_hits_total";
    /// Cache misses that triggered a fresh compute
    pub const MISSES_TOTAL: &str = "chatcore_cache_misses_total";
    /// Misses that joined an in-flight computation instead of starting a new one
    pub const DEDUPED_TOTAL: &str = "chatcore_cache_deduped_total";
    /// Entries evicted by LRU capacity pressure
    pub const EVICTIONS_TOTAL: &str = "chatcore_cache_evictions_total";
    /// Current number of entries held
    pub const ENTRIES: &str = "chatcore_cache_entries";
}

/// Circuit breaker state-transition metrics (shared by any component wrapped
/// in a `chatcore_common::CircuitBreaker`)
pub mod circuit {
    /// Transitions into the open state, labelled by `component`
    pub const OPENED_TOTAL: &str = "chatcore_circuit_opened_total";
    /// Transitions back to closed after a successful half-open probe
    pub const CLOSED_TOTAL: &str = "chatcore_circuit_closed_total";
    /// Calls rejected while open, labelled by `component`
    pub const REJECTED_TOTAL: &str = "chatcore_circuit_rejected_total";
}

/// Authentication metrics
pub mod auth {
    /// Total login attempts
    pub const LOGIN_ATTEMPTS_TOTAL: &str = "chatcore_auth_login_attempts_total";
    /// Successful logins
    pub const LOGIN_SUCCESS_TOTAL: &str = "chatcore_auth_login_success_total";
    /// Failed logins
    pub const LOGIN_FAILURES_TOTAL: &str = "chatcore_auth_login_failures_total";
    /// Accounts currently locked out from repeated failures
    pub const LOCKOUTS_ACTIVE: &str = "chatcore_auth_lockouts_active";
    /// Access token issuances
    pub const TOKENS_ISSUED_TOTAL: &str = "chatcore_auth_tokens_issued_total";
    /// Refresh token rotations
    pub const REFRESH_ROTATIONS_TOTAL: &str = "chatcore_auth_refresh_rotations_total";
    /// Refresh token reuse detections (triggers family-wide revocation)
    pub const REFRESH_REUSE_DETECTED_TOTAL: &str = "chatcore_auth_refresh_reuse_detected_total";
}

/// System/runtime metrics
pub mod system {
    /// Process uptime in seconds
    pub const UPTIME_SECONDS: &str = "chatcore_uptime_seconds";
    /// Build information (labels: version, commit, build_date)
    pub const BUILD_INFO: &str = "chatcore_build_info";
    /// Number of connected WebSocket clients on this worker
    pub const CONNECTED_CLIENTS: &str = "chatcore_connected_clients";
}

/// Common/shared metrics
pub mod common {
    /// Application errors by type
    pub const ERRORS_TOTAL: &str = "chatcore_errors_total";
}

/// Common label keys used across metrics
pub mod labels {
    pub const ENDPOINT: &str = "endpoint";
    pub const METHOD: &str = "method";
    pub const STATUS: &str = "status";
    pub const ERROR_TYPE: &str = "error_type";
    pub const ROLE: &str = "role";
    pub const SUCCESS: &str = "success";
    pub const OPERATION: &str = "operation";
    pub const STAGE: &str = "stage";
    pub const SOURCE: &str = "source";
    pub const CLASS: &str = "class";
    pub const COMPONENT: &str = "component";
    pub const WORKER_ID: &str = "worker_id";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// HTTP request duration buckets (in seconds)
    /// Covers 1ms to 60s
    pub static HTTP_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]
    });

    /// Chat pipeline duration buckets (in seconds)
    /// Covers 1ms to 30s
    pub static PIPELINE_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        ]
    });

    /// Queue size buckets
    /// Covers 1 to 10000
    pub static QUEUE_SIZE: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 10000.0,
        ]
    });
}
