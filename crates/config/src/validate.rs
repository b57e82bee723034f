//! Configuration validation engine (§4.K, §9): the startup refusal policy
//! for permanent dependency errors (§7) — invalid production configuration
//! must stop the process before it binds a socket, not fail at request time.

use crate::schema::ChatCoreConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "cors", "auth", "tls", "pipeline", "rate-limit"
    pub category: &'static str,
    /// Dotted path, e.g. "cors.allowed_origins"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == severity).count()
    }

    fn push(&mut self, severity: Severity, category: &'static str, path: impl Into<String>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate a loaded configuration. In production mode (`server.production =
/// true`) this is the gate the binary checks before it starts accepting
/// connections (§7 "Permanent dependency error" — startup refuses to
/// proceed); outside production, violations are downgraded to warnings so
/// local development isn't blocked.
#[must_use]
pub fn validate(config: &ChatCoreConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    let production = config.is_production();
    let fatal = |ok: bool| if ok { Severity::Error } else { Severity::Warning };

    // CORS: wildcard is rejected outright in production (§4.K).
    if config.cors.is_wildcard() {
        result.push(
            fatal(production),
            "cors",
            "cors.allowed_origins",
            "wildcard origin (\"*\") is not permitted in production; configure a concrete allow-list",
        );
    }
    if config.cors.allowed_origins.is_empty() {
        result.push(Severity::Error, "cors", "cors.allowed_origins", "must not be empty");
    }

    // Auth: signing key is mandatory in production (§4.F, §9).
    match &config.auth.signing_key {
        None => result.push(
            fatal(production),
            "auth",
            "auth.signing_key",
            "no access-token signing key configured",
        ),
        Some(key) => {
            use secrecy::ExposeSecret;
            if key.expose_secret().len() < 32 {
                result.push(
                    fatal(production),
                    "auth",
                    "auth.signing_key",
                    "signing key shorter than 32 bytes; generate a longer random secret",
                );
            }
        },
    }

    if production && config.server.bind != "127.0.0.1" && config.server.bind != "localhost" {
        // Secure cookies require TLS in front of the listener; this crate
        // cannot observe whether one is present, so it can only warn.
        result.push(
            Severity::Info,
            "auth",
            "server.bind",
            "production mode with a non-loopback bind address: ensure `Secure` cookies are served behind TLS",
        );
    }

    // Rate limiter: zero budgets silently deny everything, which is almost
    // certainly a misconfiguration rather than intent.
    if config.rate_limit.chat_per_window == 0 {
        result.push(
            Severity::Warning,
            "rate-limit",
            "rate_limit.chat_per_window",
            "chat rate limit is 0; every chat message will be rejected",
        );
    }
    if !config.rate_limit.use_distributed && !config.rate_limit.fallback_to_memory {
        result.push(
            Severity::Error,
            "rate-limit",
            "rate_limit",
            "use_distributed=false and fallback_to_memory=false leaves no admission path",
        );
    }

    // Pipeline thresholds must be valid probabilities/fractions.
    for (path, value) in [
        ("pipeline.stage1_threshold", config.pipeline.stage1_threshold),
        ("pipeline.stage2_threshold", config.pipeline.stage2_threshold),
        ("pipeline.stage3_cosine_min", config.pipeline.stage3_cosine_min),
        ("pipeline.stage3_override", config.pipeline.stage3_override),
    ] {
        if !(0.0..=1.0).contains(&value) {
            result.push(Severity::Error, "pipeline", path, format!("must be within [0,1], got {value}"));
        }
    }
    if config.pipeline.stage3_top_k == 0 {
        result.push(Severity::Warning, "pipeline", "pipeline.stage3_top_k", "top_k is 0; stage 3 never matches");
    }

    if config.response_cache.capacity == 0 {
        result.push(
            Severity::Warning,
            "cache",
            "response_cache.capacity",
            "capacity is 0; every request is an in-flight-dedup-only miss",
        );
    }

    result
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn base_config() -> ChatCoreConfig {
        ChatCoreConfig::default()
    }

    #[test]
    fn wildcard_cors_in_production_is_an_error() {
        let mut cfg = base_config();
        cfg.server.production = true;
        cfg.auth.signing_key = Some(SecretString::from("x".repeat(32)));
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert!(result.diagnostics.iter().any(|d| d.category == "cors"));
    }

    #[test]
    fn wildcard_cors_outside_production_is_only_a_warning() {
        let cfg = base_config();
        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert!(result.diagnostics.iter().any(|d| d.category == "cors" && d.severity == Severity::Warning));
    }

    #[test]
    fn missing_signing_key_in_production_is_an_error() {
        let mut cfg = base_config();
        cfg.server.production = true;
        cfg.cors.allowed_origins = vec!["https://example.com".into()];
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert!(result.diagnostics.iter().any(|d| d.path == "auth.signing_key"));
    }

    #[test]
    fn healthy_production_config_has_no_errors() {
        let mut cfg = base_config();
        cfg.server.production = true;
        cfg.cors.allowed_origins = vec!["https://example.com".into()];
        cfg.auth.signing_key = Some(SecretString::from("x".repeat(32)));
        let result = validate(&cfg);
        assert!(!result.has_errors());
    }

    #[test]
    fn zero_budget_rate_limit_with_no_fallback_is_an_error() {
        let mut cfg = base_config();
        cfg.rate_limit.use_distributed = false;
        cfg.rate_limit.fallback_to_memory = false;
        let result = validate(&cfg);
        assert!(result.has_errors());
    }
}
