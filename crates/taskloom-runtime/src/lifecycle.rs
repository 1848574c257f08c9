//! Agent run lifecycle state machine.
//!
//! A pure function from (current state, retry count, event) to the next
//! state plus retry/escalate flags:
//!
//! ```text
//! pending -> running -> { completed | blocked | failed }
//! blocked -> { pending | running }
//! failed  -> pending (retry), or stays failed once retries are exhausted
//! ```
//!
//! The machine never errors out. An event from an invalid source state
//! returns the unchanged state with a descriptive `error`.

use serde::{Deserialize, Serialize};
use taskloom_types::run::RunStatus;

/// Automatic retries allowed by the one-automatic-retry rule.
pub const MAX_AUTOMATIC_RETRIES: u32 = 1;

/// Events that drive a run through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Start,
    Complete,
    Fail { error: String, is_transient: bool },
    Block { reason: String },
    Retry,
    /// Advisory only, never changes state.
    SoftTimeout,
    HardTimeout,
    Escalate,
}

impl LifecycleEvent {
    /// Upper-case event name used in messages and logs.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Start => "START",
            LifecycleEvent::Complete => "COMPLETE",
            LifecycleEvent::Fail { .. } => "FAIL",
            LifecycleEvent::Block { .. } => "BLOCK",
            LifecycleEvent::Retry => "RETRY",
            LifecycleEvent::SoftTimeout => "SOFT_TIMEOUT",
            LifecycleEvent::HardTimeout => "HARD_TIMEOUT",
            LifecycleEvent::Escalate => "ESCALATE",
        }
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    /// State after the event (unchanged when rejected).
    pub state: RunStatus,
    pub should_retry: bool,
    pub should_escalate: bool,
    /// Context for the new state (block reason, failure message).
    pub reason: Option<String>,
    /// Set when the event was rejected.
    pub error: Option<String>,
}

impl TransitionOutcome {
    fn to(state: RunStatus) -> Self {
        Self {
            state,
            should_retry: false,
            should_escalate: false,
            reason: None,
            error: None,
        }
    }

    fn rejected(current: RunStatus, event: &LifecycleEvent, expected: &str) -> Self {
        Self {
            error: Some(format!(
                "Cannot apply {} in state '{}' (requires {})",
                event.name(),
                current,
                expected
            )),
            ..Self::to(current)
        }
    }

    /// Whether the event was accepted.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Lifecycle machine with a configurable retry ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleMachine {
    max_retries: u32,
}

impl Default for LifecycleMachine {
    fn default() -> Self {
        Self::new(MAX_AUTOMATIC_RETRIES)
    }
}

impl LifecycleMachine {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Apply `event` to a run in `current` that has used `retry_count` retries.
    pub fn transition(
        &self,
        current: RunStatus,
        retry_count: u32,
        event: &LifecycleEvent,
    ) -> TransitionOutcome {
        use RunStatus::*;

        match event {
            LifecycleEvent::Start => match current {
                Pending => TransitionOutcome::to(Running),
                _ => TransitionOutcome::rejected(current, event, "pending"),
            },
            LifecycleEvent::Complete => match current {
                Running => TransitionOutcome::to(Completed),
                _ => TransitionOutcome::rejected(current, event, "running"),
            },
            LifecycleEvent::Fail {
                error,
                is_transient,
            } => {
                if current != Running {
                    return TransitionOutcome::rejected(current, event, "running");
                }
                let mut outcome = TransitionOutcome::to(Failed);
                outcome.reason = Some(error.clone());
                if *is_transient && retry_count < self.max_retries {
                    outcome.should_retry = true;
                } else {
                    outcome.should_escalate = true;
                }
                outcome
            }
            LifecycleEvent::Block { reason } => match current {
                Running => TransitionOutcome {
                    reason: Some(reason.clone()),
                    ..TransitionOutcome::to(Blocked)
                },
                _ => TransitionOutcome::rejected(current, event, "running"),
            },
            LifecycleEvent::Retry => match current {
                Failed | Blocked if retry_count >= self.max_retries => TransitionOutcome {
                    should_escalate: true,
                    error: Some("max retries exceeded".to_string()),
                    ..TransitionOutcome::to(current)
                },
                Failed | Blocked => TransitionOutcome {
                    should_retry: true,
                    ..TransitionOutcome::to(Pending)
                },
                _ => TransitionOutcome::rejected(current, event, "failed or blocked"),
            },
            LifecycleEvent::SoftTimeout => TransitionOutcome::to(current),
            LifecycleEvent::HardTimeout => match current {
                Running => TransitionOutcome {
                    reason: Some("hard timeout".to_string()),
                    ..TransitionOutcome::to(Blocked)
                },
                _ => TransitionOutcome::rejected(current, event, "running"),
            },
            LifecycleEvent::Escalate => TransitionOutcome {
                should_escalate: true,
                ..TransitionOutcome::to(current)
            },
        }
    }
}

/// Apply an event under the default one-automatic-retry rule.
pub fn transition(current: RunStatus, retry_count: u32, event: &LifecycleEvent) -> TransitionOutcome {
    LifecycleMachine::default().transition(current, retry_count, event)
}
