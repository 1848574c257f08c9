//! Lifecycle events emitted by the executor and carried on the event bus.

use crate::run::{ProgressUpdate, RunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Create a new random EventId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    /// An attempt started.
    Started {
        run_id: RunId,
        agent_type: String,
        /// 1-based attempt number.
        attempt: u32,
    },
    /// An attempt failed.
    Failed {
        run_id: RunId,
        error: String,
        transient: bool,
    },
    /// A retry was scheduled after the backoff delay.
    Retrying {
        run_id: RunId,
        retry_count: u32,
        delay_ms: u64,
    },
    /// The soft timeout elapsed; the attempt keeps running.
    SoftTimeout { run_id: RunId, elapsed_ms: u64 },
    /// The run moved to `blocked`.
    Blocked { run_id: RunId, reason: String },
    /// The run needs human attention.
    Escalated { run_id: RunId, reason: String },
    /// The run completed.
    Completed {
        run_id: RunId,
        execution_time_ms: u64,
    },
}

impl RunEvent {
    /// The run this event refers to.
    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::Started { run_id, .. }
            | RunEvent::Failed { run_id, .. }
            | RunEvent::Retrying { run_id, .. }
            | RunEvent::SoftTimeout { run_id, .. }
            | RunEvent::Blocked { run_id, .. }
            | RunEvent::Escalated { run_id, .. }
            | RunEvent::Completed { run_id, .. } => *run_id,
        }
    }
}

/// The payload of a bus event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    /// Lifecycle transition.
    Run(RunEvent),
    /// Progress update.
    Progress(ProgressUpdate),
}

/// An envelope on the event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id.
    pub id: EventId,
    /// The run the payload belongs to.
    pub run_id: RunId,
    /// When the event was published.
    pub timestamp: DateTime<Utc>,
    /// Event content.
    pub payload: EventPayload,
}

impl Event {
    /// Wrap a payload in a new envelope.
    pub fn new(payload: EventPayload) -> Self {
        let run_id = match &payload {
            EventPayload::Run(ev) => ev.run_id(),
            EventPayload::Progress(update) => update.run_id,
        };
        Self {
            id: EventId::new(),
            run_id,
            timestamp: Utc::now(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope_takes_run_id_from_payload() {
        let run_id = RunId::new();
        let event = Event::new(EventPayload::Run(RunEvent::Retrying {
            run_id,
            retry_count: 1,
            delay_ms: 900,
        }));
        assert_eq!(event.run_id, run_id);
    }

    #[test]
    fn test_run_event_serialization_is_tagged() {
        let ev = RunEvent::Blocked {
            run_id: RunId::new(),
            reason: "hard timeout".to_string(),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "blocked");
        assert_eq!(json["reason"], "hard timeout");
    }
}
