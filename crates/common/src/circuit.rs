//! Three-state circuit breaker (closed → open → half-open) wrapping calls to
//! an external dependency (the Generator, VectorIndex, or a non-fallback
//! KVStore backend). One breaker instance is meant to be shared (behind an
//! `Arc`) by every caller hitting the same dependency.

use std::sync::{
    Arc,
    atomic::{AtomicU32, AtomicU64, Ordering},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    /// Consecutive failures required to trip from closed to open.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a half-open probe.
    pub open_duration: std::time::Duration,
    /// Successful probes required in half-open before closing again.
    pub success_threshold: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: std::time::Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

/// Lock-free circuit breaker. Internally a small state machine driven by
/// atomics rather than a mutex, since `is_call_permitted` sits on the hot
/// path of every dependency call.
pub struct CircuitBreaker {
    config: CircuitConfig,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    state: Arc<std::sync::atomic::AtomicU8>,
    opened_at_millis: AtomicU64,
}

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            state: Arc::new(std::sync::atomic::AtomicU8::new(STATE_CLOSED)),
            opened_at_millis: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.refresh_for_timeout();
        match self.state.load(Ordering::Acquire) {
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    /// Whether a call should be attempted right now. Open breakers admit
    /// exactly one probe once `open_duration` has elapsed, transitioning to
    /// half-open.
    pub fn is_call_permitted(&self) -> bool {
        !matches!(self.state(), CircuitState::Open)
    }

    pub fn record_success(&self) {
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => {
                let successes = self.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.success_threshold {
                    self.close();
                }
            },
            _ => {
                self.consecutive_failures.store(0, Ordering::Release);
            },
        }
    }

    pub fn record_failure(&self) {
        match self.state.load(Ordering::Acquire) {
            STATE_HALF_OPEN => self.open(),
            _ => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.open();
                }
            },
        }
    }

    fn open(&self) {
        self.state.store(STATE_OPEN, Ordering::Release);
        self.opened_at_millis
            .store(crate::now_millis(), Ordering::Release);
        self.consecutive_successes.store(0, Ordering::Release);
    }

    fn close(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
        self.consecutive_successes.store(0, Ordering::Release);
    }

    fn refresh_for_timeout(&self) {
        if self.state.load(Ordering::Acquire) != STATE_OPEN {
            return;
        }
        let opened_at = self.opened_at_millis.load(Ordering::Acquire);
        let elapsed_ms = crate::now_millis().saturating_sub(opened_at);
        if elapsed_ms >= self.config.open_duration.as_millis() as u64 {
            // Transition open -> half-open exactly once; a lost race just
            // means another caller already flipped it, which is fine.
            let _ = self.state.compare_exchange(
                STATE_OPEN,
                STATE_HALF_OPEN,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
            self.consecutive_successes.store(0, Ordering::Release);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(CircuitConfig {
            failure_threshold: 3,
            ..CircuitConfig::default()
        });
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.is_call_permitted());
    }

    #[test]
    fn success_resets_failure_count() {
        let cb = CircuitBreaker::new(CircuitConfig {
            failure_threshold: 3,
            ..CircuitConfig::default()
        });
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_after_timeout_and_closes_on_probe_success() {
        let cb = CircuitBreaker::new(CircuitConfig {
            failure_threshold: 1,
            open_duration: std::time::Duration::from_millis(0),
            success_threshold: 1,
        });
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        // open_duration is zero, so the next state() call flips to half-open.
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.is_call_permitted());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let cb = CircuitBreaker::new(CircuitConfig {
            failure_threshold: 1,
            open_duration: std::time::Duration::from_millis(0),
            success_threshold: 1,
        });
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
