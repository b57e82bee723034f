//! Shared types, error definitions, and utilities used across all chatcore crates.

pub mod circuit;
pub mod error;

pub use {
    circuit::{CircuitBreaker, CircuitConfig, CircuitState},
    error::{ChatCoreError, Error, FromMessage, Result},
};

/// Current epoch time in milliseconds. The single place every crate goes for
/// "now" so that tests can reason about clocks without reaching into `std::time`
/// in a dozen different ways.
#[must_use]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
