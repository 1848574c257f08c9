//! Agent run records, requests, responses and progress updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Create a new random RunId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle status of an agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created, waiting to start (or waiting for a retry).
    #[default]
    Pending,
    /// The implementation is executing.
    Running,
    /// Finished successfully. Terminal.
    Completed,
    /// Paused pending human attention (e.g. after a hard timeout).
    Blocked,
    /// The last attempt failed.
    Failed,
}

impl RunStatus {
    /// `completed` is the only state with no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Blocked => write!(f, "blocked"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A document handed to an agent as input context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDocument {
    /// Document identifier (artifact name for workflow artifacts).
    pub id: String,
    /// Text content.
    pub content: String,
}

/// A unit of work addressed to a registered agent implementation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Which registered implementation handles this request.
    pub agent_type: String,
    /// What the agent should accomplish.
    pub objective: String,
    /// Short summary of the user the work is done for.
    #[serde(default)]
    pub user_profile_summary: String,
    /// Optional project the work belongs to.
    #[serde(default)]
    pub project: Option<String>,
    /// Related task descriptions.
    #[serde(default)]
    pub tasks: Vec<String>,
    /// Desired outcome, if the caller stated one.
    #[serde(default)]
    pub outcome: Option<String>,
    /// Documents attached as context.
    #[serde(default)]
    pub input_documents: Vec<InputDocument>,
    /// Names of the outputs the caller expects back.
    #[serde(default)]
    pub expected_output_types: Vec<String>,
    /// Opaque QA strictness tag, interpreted outside the core.
    #[serde(default)]
    pub qa_profile: Option<String>,
}

impl AgentRequest {
    /// Build a minimal request.
    pub fn new(agent_type: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            objective: objective.into(),
            ..Default::default()
        }
    }
}

/// What an implementation returns on success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Primary output text. Workflow artifacts are taken from here.
    pub output: String,
    /// Free-form metadata (model name, token counts, ...).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl AgentResponse {
    /// A response carrying only output text.
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            metadata: HashMap::new(),
        }
    }
}

/// A persisted execution record for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    /// Run identity.
    pub id: RunId,
    /// Agent type copied from the request.
    pub agent_type: String,
    /// Current lifecycle status.
    pub status: RunStatus,
    /// Automatic retries consumed so far.
    pub retry_count: u32,
    /// The original request, kept for replay.
    pub request: AgentRequest,
    /// Response once completed.
    pub response: Option<AgentResponse>,
    /// Most recent error message.
    pub error: Option<String>,
    /// When the run first started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the run reached completed/failed.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl AgentRun {
    /// Create a fresh pending run for a request.
    pub fn new(request: AgentRequest) -> Self {
        Self {
            id: RunId::new(),
            agent_type: request.agent_type.clone(),
            status: RunStatus::Pending,
            retry_count: 0,
            request,
            response: None,
            error: None,
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// A progress update forwarded to observers while a run executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    /// The run this update belongs to.
    pub run_id: RunId,
    /// When the update was emitted.
    pub timestamp: DateTime<Utc>,
    /// Milliseconds since the current attempt started.
    pub elapsed_ms: u64,
    /// Percentage complete (0-100), if known.
    pub progress: Option<u8>,
    /// Human-readable status line.
    pub message: Option<String>,
    /// Set on the final update of a successful run.
    pub is_complete: bool,
}

/// Who is mutating a run, recorded in the store's audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    /// Actor responsible for the mutation (user id, service name).
    pub actor: String,
    /// Optional correlation id (workflow id, request id).
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl AuditContext {
    /// Audit context for an actor.
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            correlation_id: None,
        }
    }

    /// Attach a correlation id.
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_run_is_pending() {
        let run = AgentRun::new(AgentRequest::new("writer", "draft a memo"));
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.retry_count, 0);
        assert_eq!(run.agent_type, "writer");
        assert!(run.started_at.is_none());
    }

    #[test]
    fn test_only_completed_is_terminal() {
        assert!(RunStatus::Completed.is_terminal());
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Blocked,
            RunStatus::Failed,
        ] {
            assert!(!status.is_terminal(), "{status} should not be terminal");
        }
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&RunStatus::Blocked).unwrap();
        assert_eq!(json, "\"blocked\"");
    }

    #[test]
    fn test_run_id_roundtrip_from_str() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
