//! Configuration types: retry policy, circuit breaker and kernel settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Per-execution retry and timeout policy. Immutable once supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Automatic retries allowed per run.
    pub max_retries: u32,
    /// Elapsed time after which a "still working" signal is emitted.
    pub soft_timeout_ms: u64,
    /// Elapsed time after which the attempt is aborted.
    pub hard_timeout_ms: u64,
    /// Backoff for the first retry.
    pub backoff_base_ms: u64,
    /// Upper bound for the un-jittered backoff.
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            soft_timeout_ms: 30_000,
            hard_timeout_ms: 120_000,
            backoff_base_ms: 1_000,
            backoff_max_ms: 10_000,
        }
    }
}

/// Circuit breaker settings shared by every protected dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Whether the executor gates runs on the breaker.
    pub enabled: bool,
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Seconds the circuit stays open before half-opening.
    pub cooldown_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            cooldown_secs: 60,
        }
    }
}

/// Top-level kernel configuration, loaded from `~/.taskloom/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Retry policy applied when the caller supplies none.
    pub retry: RetryPolicy,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Events retained in the bus history ring buffer.
    pub event_history: usize,
    /// Directory of workflow pattern files loaded at boot.
    pub patterns_dir: Option<PathBuf>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            event_history: 1000,
            patterns_dir: None,
        }
    }
}
