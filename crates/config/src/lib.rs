//! Configuration loading, validation, and env substitution (§1.1, §6).
//!
//! Config files: `chatcore.toml`, `chatcore.yaml`, or `chatcore.json`
//! Searched in `./` then `~/.config/chatcore/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod template;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_or_default_config_path, load_config, save_config},
    schema::{
        AuthConfig, ChatCoreConfig, CircuitConfig, CorsConfig, PipelineConfig, RateLimitConfig,
        ResponseCacheConfig, ServerConfig, SessionConfig, WsConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
