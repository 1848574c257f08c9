//! Run-store contract and the in-memory implementation.
//!
//! The executor persists every lifecycle transition through a [`RunStore`]
//! before moving on. Each call records one audit mutation and returns the
//! full updated run. Implementations must tolerate concurrent calls for
//! different run ids (parallel workflow groups).

use crate::audit::{AuditAction, AuditEntry, AuditLog};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use taskloom_types::error::{TaskloomError, TaskloomResult};
use taskloom_types::run::{AgentRequest, AgentResponse, AgentRun, AuditContext, RunId, RunStatus};
use tracing::debug;

/// Partial update applied to a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    pub status: Option<RunStatus>,
    pub retry_count: Option<u32>,
    pub response: Option<AgentResponse>,
    pub error: Option<String>,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_response(mut self, response: AgentResponse) -> Self {
        self.response = Some(response);
        self
    }

    /// Audit action implied by the patch.
    pub fn audit_action(&self) -> AuditAction {
        match self.status {
            Some(RunStatus::Running) => AuditAction::Start,
            Some(RunStatus::Completed) => AuditAction::Complete,
            Some(RunStatus::Failed) => AuditAction::Fail,
            Some(RunStatus::Blocked) => AuditAction::Block,
            Some(RunStatus::Pending) | None => AuditAction::Update,
        }
    }
}

/// Persistence contract consumed by the executor.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a pending run embedding the request.
    async fn create(&self, request: &AgentRequest, audit: &AuditContext) -> TaskloomResult<AgentRun>;

    /// Apply a patch and return the updated run.
    async fn update(&self, id: RunId, patch: RunPatch, audit: &AuditContext) -> TaskloomResult<AgentRun>;

    async fn get(&self, id: RunId) -> TaskloomResult<Option<AgentRun>>;

    async fn start(&self, id: RunId, audit: &AuditContext) -> TaskloomResult<AgentRun> {
        self.update(id, RunPatch::status(RunStatus::Running), audit).await
    }

    async fn complete(
        &self,
        id: RunId,
        response: AgentResponse,
        audit: &AuditContext,
    ) -> TaskloomResult<AgentRun> {
        self.update(
            id,
            RunPatch::status(RunStatus::Completed).with_response(response),
            audit,
        )
        .await
    }

    /// Mark failed. `retry_count` is the final, budget-consuming count.
    async fn fail(
        &self,
        id: RunId,
        error: &str,
        retry_count: u32,
        audit: &AuditContext,
    ) -> TaskloomResult<AgentRun> {
        self.update(
            id,
            RunPatch::status(RunStatus::Failed)
                .with_error(error)
                .with_retry_count(retry_count),
            audit,
        )
        .await
    }

    async fn block(&self, id: RunId, reason: &str, audit: &AuditContext) -> TaskloomResult<AgentRun> {
        self.update(id, RunPatch::status(RunStatus::Blocked).with_error(reason), audit)
            .await
    }
}

/// `DashMap`-backed store with a hash-chained audit trail.
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: DashMap<RunId, AgentRun>,
    audit: AuditLog,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    /// Audit entries for a run.
    pub fn history(&self, id: RunId) -> Vec<AuditEntry> {
        self.audit.entries_for(id)
    }

    /// All runs, optionally filtered by status, oldest first.
    pub fn list(&self, status: Option<RunStatus>) -> Vec<AgentRun> {
        let mut runs: Vec<AgentRun> = self
            .runs
            .iter()
            .filter(|r| status.map(|s| r.status == s).unwrap_or(true))
            .map(|r| r.value().clone())
            .collect();
        runs.sort_by_key(|r| r.created_at);
        runs
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, request: &AgentRequest, audit: &AuditContext) -> TaskloomResult<AgentRun> {
        let run = AgentRun::new(request.clone());
        self.audit
            .record(run.id, audit, AuditAction::Create, "status=pending retry_count=0");
        self.runs.insert(run.id, run.clone());
        debug!(run_id = %run.id, agent_type = %run.agent_type, "Run created");
        Ok(run)
    }

    async fn update(&self, id: RunId, patch: RunPatch, audit: &AuditContext) -> TaskloomResult<AgentRun> {
        let mut run = self
            .runs
            .get_mut(&id)
            .ok_or_else(|| TaskloomError::RunNotFound(id.to_string()))?;

        if run.status.is_terminal() {
            return Err(TaskloomError::Store(format!(
                "run {id} is completed and cannot be modified"
            )));
        }

        let action = patch.audit_action();
        let now = Utc::now();
        if let Some(status) = patch.status {
            run.status = status;
            match status {
                RunStatus::Running if run.started_at.is_none() => run.started_at = Some(now),
                RunStatus::Completed | RunStatus::Failed => run.completed_at = Some(now),
                _ => {}
            }
        }
        if let Some(retry_count) = patch.retry_count {
            run.retry_count = retry_count;
        }
        if let Some(response) = patch.response {
            run.response = Some(response);
        }
        if let Some(error) = patch.error {
            run.error = Some(error);
        }

        self.audit.record(
            id,
            audit,
            action,
            format!("status={} retry_count={}", run.status, run.retry_count),
        );
        Ok(run.clone())
    }

    async fn get(&self, id: RunId) -> TaskloomResult<Option<AgentRun>> {
        Ok(self.runs.get(&id).map(|r| r.value().clone()))
    }
}
