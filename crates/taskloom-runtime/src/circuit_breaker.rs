//! Circuit breaker for shared downstream dependencies (e.g. an LLM provider).
//!
//! Counts consecutive failures per dependency. At the threshold the circuit
//! opens for a fixed cooldown. Once the cooldown elapses exactly one probe
//! request is let through (half-open): success closes the circuit, failure
//! re-opens it with a fresh cooldown.
//!
//! This is distinct from the per-run retry policy: it protects a dependency
//! across many runs. State is owned by the [`CircuitBreaker`] value the
//! caller constructs and shares, never by a global.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use taskloom_types::config::CircuitBreakerConfig;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Circuit state
// ---------------------------------------------------------------------------

/// Observable state of a circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally.
    Closed,
    /// In cooldown, requests are rejected.
    Open,
    /// Cooldown elapsed, one probe request allowed.
    HalfOpen,
}

/// Bookkeeping for one dependency.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    /// Consecutive failures since the last success.
    pub failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    pub is_open: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// A half-open probe has been admitted and has not reported back.
    #[serde(default)]
    pub probe_in_flight: bool,
}

impl CircuitBreakerState {
    /// State as of `now`.
    pub fn state_at(&self, now: DateTime<Utc>) -> CircuitState {
        if !self.is_open {
            return CircuitState::Closed;
        }
        match self.cooldown_until {
            Some(until) if now < until => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    /// Whether a request may proceed at `now`. Admitting the half-open probe
    /// consumes it; later calls are rejected until the probe reports back.
    pub fn can_execute_at(&mut self, now: DateTime<Utc>) -> bool {
        match self.state_at(now) {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if self.probe_in_flight {
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Give back an admitted probe without an outcome. The circuit stays
    /// half-open and the next request becomes the probe.
    pub fn release_probe(&mut self) {
        self.probe_in_flight = false;
    }

    /// Reset to closed with zero failures.
    pub fn record_success(&mut self) {
        *self = Self::default();
    }

    /// Count a failure at `now`; opens the circuit at the threshold, and
    /// re-opens it immediately if the half-open probe failed.
    pub fn record_failure_at(&mut self, now: DateTime<Utc>, config: &CircuitBreakerConfig) {
        self.failures = self.failures.saturating_add(1);
        self.last_failure = Some(now);

        if self.probe_in_flight || self.is_open || self.failures >= config.failure_threshold {
            self.is_open = true;
            self.probe_in_flight = false;
            self.cooldown_until = Some(now + cooldown(config));
        }
    }

    /// Seconds left in the cooldown, if open.
    pub fn remaining_secs_at(&self, now: DateTime<Utc>) -> Option<u64> {
        let until = self.cooldown_until?;
        if !self.is_open || now >= until {
            return None;
        }
        Some((until - now).num_seconds().max(0) as u64)
    }
}

fn cooldown(config: &CircuitBreakerConfig) -> Duration {
    Duration::seconds(config.cooldown_secs.min(u32::MAX as u64) as i64)
}

// ---------------------------------------------------------------------------
// Verdict / snapshot
// ---------------------------------------------------------------------------

/// Verdict from the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakerVerdict {
    /// Circuit closed.
    Allow,
    /// Half-open probe admitted.
    AllowProbe,
    /// Circuit open.
    Reject { retry_after_secs: u64 },
}

impl BreakerVerdict {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, BreakerVerdict::Reject { .. })
    }
}

/// Snapshot of a dependency's breaker for observability.
#[derive(Debug, Clone, Serialize)]
pub struct DependencySnapshot {
    pub dependency: String,
    pub state: CircuitState,
    pub failures: u32,
    pub cooldown_remaining_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// CircuitBreaker
// ---------------------------------------------------------------------------

/// Circuit breakers for all dependencies, keyed by dependency name.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    states: DashMap<String, CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether a request to `dependency` should proceed.
    pub fn check(&self, dependency: &str) -> BreakerVerdict {
        self.check_at(dependency, Utc::now())
    }

    pub fn check_at(&self, dependency: &str, now: DateTime<Utc>) -> BreakerVerdict {
        let mut state = match self.states.get_mut(dependency) {
            Some(s) => s,
            None => return BreakerVerdict::Allow,
        };

        let before = state.state_at(now);
        if state.can_execute_at(now) {
            if before == CircuitState::HalfOpen {
                debug!(dependency, "circuit breaker: half-open, admitting probe");
                BreakerVerdict::AllowProbe
            } else {
                BreakerVerdict::Allow
            }
        } else {
            BreakerVerdict::Reject {
                retry_after_secs: state.remaining_secs_at(now).unwrap_or(0),
            }
        }
    }

    /// Shorthand for `check(dependency).is_allowed()`.
    pub fn can_execute(&self, dependency: &str) -> bool {
        self.check(dependency).is_allowed()
    }

    /// Record a success. Closes the circuit.
    pub fn record_success(&self, dependency: &str) {
        if let Some(mut state) = self.states.get_mut(dependency) {
            if state.failures > 0 || state.is_open {
                info!(dependency, "circuit breaker: dependency recovered, closing circuit");
            }
            state.record_success();
        }
    }

    /// Release a half-open probe that ended without a health signal (a
    /// semantic failure, or an aborted run).
    pub fn release_probe(&self, dependency: &str) {
        if let Some(mut state) = self.states.get_mut(dependency) {
            if state.probe_in_flight {
                debug!(dependency, "circuit breaker: probe released without outcome");
                state.release_probe();
            }
        }
    }

    /// Record a failure.
    pub fn record_failure(&self, dependency: &str) {
        self.record_failure_at(dependency, Utc::now());
    }

    pub fn record_failure_at(&self, dependency: &str, now: DateTime<Utc>) {
        let mut state = self.states.entry(dependency.to_string()).or_default();
        let was_open = state.is_open;
        state.record_failure_at(now, &self.config);

        if state.is_open && !was_open {
            warn!(
                dependency,
                failures = state.failures,
                cooldown_secs = self.config.cooldown_secs,
                "circuit breaker: opening circuit"
            );
        } else {
            debug!(dependency, failures = state.failures, "circuit breaker: failure recorded");
        }
    }

    /// Current state of a dependency's circuit.
    pub fn state(&self, dependency: &str) -> CircuitState {
        self.states
            .get(dependency)
            .map(|s| s.state_at(Utc::now()))
            .unwrap_or(CircuitState::Closed)
    }

    /// Copy of a dependency's bookkeeping.
    pub fn get(&self, dependency: &str) -> Option<CircuitBreakerState> {
        self.states.get(dependency).map(|s| s.clone())
    }

    /// Snapshot of every tracked dependency.
    pub fn snapshot(&self) -> Vec<DependencySnapshot> {
        let now = Utc::now();
        let mut out: Vec<DependencySnapshot> = self
            .states
            .iter()
            .map(|entry| DependencySnapshot {
                dependency: entry.key().clone(),
                state: entry.state_at(now),
                failures: entry.failures,
                cooldown_remaining_secs: entry.remaining_secs_at(now),
            })
            .collect();
        out.sort_by(|a, b| a.dependency.cmp(&b.dependency));
        out
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
