//! Workflow pattern, execution plan, and result types.
//!
//! A pattern is a static, declarative list of steps. Steps sharing a
//! `group_id` form an execution group; groups run in the order their ids
//! first appear. Steps exchange named text artifacts.

use crate::run::{AgentResponse, InputDocument, RunId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Named text outputs accumulated while a workflow runs.
pub type ArtifactMap = HashMap<String, String>;

/// A single step in a workflow pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Step identifier, unique within the pattern.
    pub step_id: String,
    /// Agent type that executes this step.
    pub agent_type: String,
    /// Objective with `{{name}}` placeholders.
    pub objective_template: String,
    /// Execution group this step belongs to.
    pub group_id: String,
    /// Whether the step forces sequential execution of its group.
    #[serde(default)]
    pub is_blocking: bool,
    /// Artifact names this step consumes.
    #[serde(default)]
    pub input_artifacts: Vec<String>,
    /// Artifact names this step produces.
    #[serde(default)]
    pub output_artifacts: Vec<String>,
}

/// A reusable multi-step workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowPattern {
    /// Pattern name, used as its registry key.
    pub name: String,
    /// What the workflow is for.
    #[serde(default)]
    pub description: String,
    /// Steps in declaration order.
    pub steps: Vec<WorkflowStep>,
    /// QA profile inherited by every step request.
    #[serde(default)]
    pub qa_profile: Option<String>,
    /// Artifacts the whole workflow must produce.
    #[serde(default)]
    pub expected_artifacts: Vec<String>,
}

/// Steps sharing a group id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionGroup {
    /// The shared group id.
    pub group_id: String,
    /// Member steps in declaration order.
    pub steps: Vec<WorkflowStep>,
    /// True if any member is blocking.
    pub is_blocking: bool,
    /// True only with more than one step and none blocking.
    pub can_run_parallel: bool,
}

/// Ordered groups derived from a pattern. Built per execution and discarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub groups: Vec<ExecutionGroup>,
}

impl ExecutionPlan {
    /// Total number of steps across all groups.
    pub fn step_count(&self) -> usize {
        self.groups.iter().map(|g| g.steps.len()).sum()
    }
}

/// Caller-supplied context for a workflow execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    #[serde(default)]
    pub user_profile_summary: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub input_documents: Vec<InputDocument>,
    /// Values substituted into `{{name}}` placeholders before artifacts.
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

/// Outcome of one workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub agent_type: String,
    pub success: bool,
    /// Run record id, absent when no run was created.
    pub run_id: Option<RunId>,
    pub response: Option<AgentResponse>,
    pub error: Option<String>,
    /// Whether the executor retried this step.
    pub was_retried: bool,
    pub execution_time_ms: u64,
}

/// Aggregate outcome of a workflow execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    /// True iff no step failed.
    pub success: bool,
    /// Results in execution order.
    pub step_results: Vec<StepResult>,
    /// Every artifact produced.
    pub artifacts: ArtifactMap,
    /// First step that failed, if any.
    pub failed_step: Option<String>,
    pub total_time_ms: u64,
    pub completed_steps: usize,
}

/// Static validation report for a pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_from_toml_applies_defaults() {
        let src = r#"
            name = "research"
            qa_profile = "balanced"
            expected_artifacts = ["report"]

            [[steps]]
            step_id = "gather"
            agent_type = "researcher"
            objective_template = "Research {{topic}}"
            group_id = "g1"
            output_artifacts = ["notes"]

            [[steps]]
            step_id = "write"
            agent_type = "writer"
            objective_template = "Write from {{notes}}"
            group_id = "g2"
            is_blocking = true
            input_artifacts = ["notes"]
            output_artifacts = ["report"]
        "#;
        let pattern: WorkflowPattern = toml::from_str(src).unwrap();
        assert_eq!(pattern.steps.len(), 2);
        assert!(!pattern.steps[0].is_blocking);
        assert!(pattern.steps[0].input_artifacts.is_empty());
        assert!(pattern.steps[1].is_blocking);
        assert_eq!(pattern.qa_profile.as_deref(), Some("balanced"));
        assert!(pattern.description.is_empty());
    }
}
