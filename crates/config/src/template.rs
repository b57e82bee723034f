//! Default configuration template with all options documented.
//!
//! This template is used when creating a new config file. It includes every
//! `ChatCoreConfig` field with its default, so an operator can see everything
//! tunable even without changing the defaults.

/// Generate the default config template with a specific port.
#[must_use]
pub fn default_config_template(port: u16) -> String {
    format!(
        r##"# chatcore configuration
# ======================
# Uncomment and modify settings as needed. Changes require a restart.
#
# Environment variable substitution is supported: ${{ENV_VAR}}

# ══════════════════════════════════════════════════════════════════
# SERVER
# ══════════════════════════════════════════════════════════════════

[server]
bind = "127.0.0.1"              # Address to bind to ("0.0.0.0" for all interfaces)
port = {port}
production = false              # true enables startup refusals: no wildcard CORS,
                                 # a required access-token signing key, HSTS
# worker_id = "w1"               # Globally unique; auto-generated if unset
shutdown_grace_seconds = 10     # Drain time before a worker exits
http_request_logs = false       # Verbose per-request access logs (debugging)

# ══════════════════════════════════════════════════════════════════
# SESSION
# ══════════════════════════════════════════════════════════════════

[session]
session_ttl_seconds = 3600      # SessionInfo expiry since last activity

# ══════════════════════════════════════════════════════════════════
# RATE LIMIT
# ══════════════════════════════════════════════════════════════════

[rate_limit]
window_seconds = 60
general_per_window = 200
chat_per_window = 100
login_per_window = 5
auth_api_per_window = 120
use_distributed = true          # Route counters through the shared KVStore
fallback_to_memory = true       # Degrade to a local window if the KVStore is down
cleanup_interval_seconds = 300

# ══════════════════════════════════════════════════════════════════
# AUTH
# ══════════════════════════════════════════════════════════════════

[auth]
access_token_ttl_seconds = 900
refresh_token_ttl_seconds = 604800
max_login_failures = 5
block_duration_seconds = 900
# signing_key = "${{CHATCORE_SIGNING_KEY}}"   # Required in production

# ══════════════════════════════════════════════════════════════════
# RESPONSE CACHE
# ══════════════════════════════════════════════════════════════════

[response_cache]
ttl_seconds = 600
capacity = 1000
shared = false                  # Share entries across workers via the KVStore

# ══════════════════════════════════════════════════════════════════
# PIPELINE
# ══════════════════════════════════════════════════════════════════

[pipeline]
stage1_threshold = 0.6
stage2_threshold = 0.55
stage2_alpha = 0.5
stage2_beta = 0.3
stage2_gamma = 0.2
stage3_cosine_min = 0.72
stage3_margin = 0.05
stage3_override = 0.85
stage3_top_k = 5

# ══════════════════════════════════════════════════════════════════
# CIRCUIT BREAKER
# ══════════════════════════════════════════════════════════════════

[circuit]
failure_threshold = 5
open_duration_seconds = 30
success_threshold = 1

# ══════════════════════════════════════════════════════════════════
# WEBSOCKET
# ══════════════════════════════════════════════════════════════════

[ws]
max_frame_bytes = 65536
idle_seconds = 30
pong_timeout_seconds = 10
send_queue_capacity = 64

# ══════════════════════════════════════════════════════════════════
# CORS
# ══════════════════════════════════════════════════════════════════

[cors]
allowed_origins = ["*"]         # MUST be a concrete list when server.production = true
"##
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_as_valid_toml_config() {
        let rendered = default_config_template(9100);
        let cfg: crate::schema::ChatCoreConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(cfg.server.port, 9100);
    }
}
