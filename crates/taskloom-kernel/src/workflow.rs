//! Plans and executes multi-step agent workflows.
//!
//! A pattern's steps are grouped by `group_id` into an [`ExecutionPlan`].
//! Groups run strictly in plan order:
//! - a parallel group instantiates every step up front and fans out through
//!   the executor's parallel batch, joining on all of them;
//! - any other group runs its steps one by one, so a later step can read an
//!   artifact produced earlier in the same group.
//!
//! The first failing step stops the workflow. Successful steps publish their
//! declared output artifacts (the response's primary text) into a shared
//! artifact map that later steps read through `{{name}}` placeholders.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use taskloom_runtime::executor::{ExecuteOptions, ExecutionResult, Executor};
use taskloom_types::run::{AgentRequest, AuditContext, InputDocument};
use taskloom_types::workflow::{
    ArtifactMap, ExecutionGroup, ExecutionPlan, StepResult, ValidationReport, WorkflowContext,
    WorkflowPattern, WorkflowResult, WorkflowStep,
};
use tracing::{debug, info, warn};

/// Group a pattern's steps by `group_id`, preserving first-seen group order.
pub fn plan_execution(pattern: &WorkflowPattern) -> ExecutionPlan {
    let mut order: Vec<&str> = Vec::new();
    let mut members: HashMap<&str, Vec<WorkflowStep>> = HashMap::new();

    for step in &pattern.steps {
        let key = step.group_id.as_str();
        if !members.contains_key(key) {
            order.push(key);
        }
        members.entry(key).or_default().push(step.clone());
    }

    let groups = order
        .into_iter()
        .filter_map(|group_id| {
            let steps = members.remove(group_id)?;
            let is_blocking = steps.iter().any(|s| s.is_blocking);
            Some(ExecutionGroup {
                group_id: group_id.to_string(),
                can_run_parallel: steps.len() > 1 && !is_blocking,
                is_blocking,
                steps,
            })
        })
        .collect();

    ExecutionPlan { groups }
}

/// Replace every `{{key}}` in `template` in a single left-to-right pass.
///
/// Substituted text is never rescanned, so a value containing `{{other}}`
/// is kept literally. Unknown placeholders are left as written.
fn expand_variables<'a>(template: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        result.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            result.push_str(&rest[open..]);
            return result;
        };
        let key = &after[..close];
        match lookup(key) {
            Some(value) => result.push_str(value),
            None => result.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    result.push_str(rest);
    result
}

/// Build the executor request for one step.
///
/// Placeholders resolve to a context variable first, else to a produced
/// artifact the step declares as an input. Produced inputs are also attached as input
/// documents after the caller's own documents.
pub fn instantiate_step(
    step: &WorkflowStep,
    context: &WorkflowContext,
    artifacts: &ArtifactMap,
    qa_profile: Option<&str>,
) -> AgentRequest {
    let mut input_documents = context.input_documents.clone();
    let mut available: HashMap<&str, &str> = HashMap::new();
    for name in &step.input_artifacts {
        if let Some(content) = artifacts.get(name) {
            available.insert(name.as_str(), content.as_str());
            input_documents.push(InputDocument {
                id: name.clone(),
                content: content.clone(),
            });
        }
    }
    let objective = expand_variables(&step.objective_template, |key| {
        context
            .variables
            .get(key)
            .map(String::as_str)
            .or_else(|| available.get(key).copied())
    });

    AgentRequest {
        agent_type: step.agent_type.clone(),
        objective,
        user_profile_summary: context.user_profile_summary.clone(),
        project: context.project.clone(),
        tasks: context.tasks.clone(),
        outcome: context.outcome.clone(),
        input_documents,
        expected_output_types: step.output_artifacts.clone(),
        qa_profile: qa_profile.map(str::to_string),
    }
}

/// Static check of a pattern's artifact flow. Nothing is executed.
///
/// Flags duplicate step ids, inputs not produced by an earlier step, and
/// expected artifacts no step produces.
pub fn validate_pattern(pattern: &WorkflowPattern) -> ValidationReport {
    let mut errors = Vec::new();
    let mut seen_steps = HashSet::new();
    let mut produced: HashSet<&str> = HashSet::new();

    for step in &pattern.steps {
        if !seen_steps.insert(step.step_id.as_str()) {
            errors.push(format!("duplicate step id '{}'", step.step_id));
        }
        for input in &step.input_artifacts {
            if !produced.contains(input.as_str()) {
                errors.push(format!(
                    "step '{}' consumes artifact '{}' which no earlier step produces",
                    step.step_id, input
                ));
            }
        }
        produced.extend(step.output_artifacts.iter().map(String::as_str));
    }

    for expected in &pattern.expected_artifacts {
        if !produced.contains(expected.as_str()) {
            errors.push(format!(
                "expected artifact '{expected}' is not produced by any step"
            ));
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
    }
}

fn step_result(step: &WorkflowStep, result: ExecutionResult) -> StepResult {
    StepResult {
        step_id: step.step_id.clone(),
        agent_type: step.agent_type.clone(),
        success: result.success,
        run_id: result.run_id(),
        response: result.response,
        error: result.error,
        was_retried: result.was_retried,
        execution_time_ms: result.execution_time_ms,
    }
}

fn store_artifacts(step: &WorkflowStep, result: &StepResult, artifacts: &mut ArtifactMap) {
    if let Some(response) = &result.response {
        for name in &step.output_artifacts {
            artifacts.insert(name.clone(), response.output.clone());
        }
    }
}

/// Drives the executor across a pattern's execution plan.
#[derive(Clone)]
pub struct WorkflowSequencer {
    executor: Arc<Executor>,
}

impl WorkflowSequencer {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Execute a pattern to completion or first failure. Never fails;
    /// everything is reported in the [`WorkflowResult`].
    pub async fn execute_workflow(
        &self,
        pattern: &WorkflowPattern,
        context: &WorkflowContext,
        audit: &AuditContext,
        options: &ExecuteOptions,
    ) -> WorkflowResult {
        let started = Instant::now();
        let plan = plan_execution(pattern);
        let qa_profile = pattern.qa_profile.as_deref();

        info!(
            pattern = %pattern.name,
            groups = plan.groups.len(),
            steps = plan.step_count(),
            "Starting workflow execution"
        );

        let mut artifacts = ArtifactMap::new();
        let mut step_results: Vec<StepResult> = Vec::with_capacity(plan.step_count());
        let mut failed_step: Option<String> = None;

        for group in &plan.groups {
            debug!(
                group = %group.group_id,
                steps = group.steps.len(),
                parallel = group.can_run_parallel,
                "Executing workflow group"
            );

            if group.can_run_parallel {
                let requests = group
                    .steps
                    .iter()
                    .map(|step| instantiate_step(step, context, &artifacts, qa_profile))
                    .collect();
                let results = self.executor.execute_parallel(requests, audit, options).await;

                for (step, result) in group.steps.iter().zip(results) {
                    let result = step_result(step, result);
                    if result.success {
                        store_artifacts(step, &result, &mut artifacts);
                    } else if failed_step.is_none() {
                        failed_step = Some(step.step_id.clone());
                    }
                    step_results.push(result);
                }
            } else {
                for step in &group.steps {
                    let request = instantiate_step(step, context, &artifacts, qa_profile);
                    let result = step_result(step, self.executor.execute(request, audit, options).await);
                    let succeeded = result.success;
                    if succeeded {
                        store_artifacts(step, &result, &mut artifacts);
                    } else {
                        failed_step = Some(step.step_id.clone());
                    }
                    step_results.push(result);
                    if !succeeded {
                        break;
                    }
                }
            }

            if let Some(step_id) = &failed_step {
                warn!(
                    pattern = %pattern.name,
                    group = %group.group_id,
                    step = %step_id,
                    "Workflow step failed, skipping remaining groups"
                );
                break;
            }
        }

        let completed_steps = step_results.iter().filter(|r| r.success).count();
        let total_time_ms = started.elapsed().as_millis() as u64;
        info!(
            pattern = %pattern.name,
            success = failed_step.is_none(),
            completed_steps,
            total_time_ms,
            "Workflow finished"
        );

        WorkflowResult {
            success: failed_step.is_none(),
            step_results,
            artifacts,
            failed_step,
            total_time_ms,
            completed_steps,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicU32, Ordering};
    use taskloom_runtime::observer::ProgressReporter;
    use taskloom_runtime::registry::AgentRegistry;
    use taskloom_runtime::store::InMemoryRunStore;
    use taskloom_types::config::RetryPolicy;
    use taskloom_types::error::TaskloomError;
    use taskloom_types::run::AgentResponse;

    fn step(id: &str, group: &str, blocking: bool) -> WorkflowStep {
        WorkflowStep {
            step_id: id.to_string(),
            agent_type: "echo".to_string(),
            objective_template: format!("do {id}"),
            group_id: group.to_string(),
            is_blocking: blocking,
            input_artifacts: vec![],
            output_artifacts: vec![],
        }
    }

    fn pattern(steps: Vec<WorkflowStep>) -> WorkflowPattern {
        WorkflowPattern {
            name: "test".to_string(),
            description: String::new(),
            steps,
            qa_profile: Some("strict".to_string()),
            expected_artifacts: vec![],
        }
    }

    fn sequencer() -> (Arc<AgentRegistry>, WorkflowSequencer) {
        let registry = Arc::new(AgentRegistry::new());
        let store = Arc::new(InMemoryRunStore::new());
        let executor = Arc::new(Executor::new(registry.clone(), store));
        (registry, WorkflowSequencer::new(executor))
    }

    fn options() -> ExecuteOptions {
        ExecuteOptions::new(RetryPolicy {
            backoff_base_ms: 1,
            backoff_max_ms: 2,
            ..RetryPolicy::default()
        })
    }

    #[test]
    fn test_plan_preserves_first_seen_group_order() {
        let p = pattern(vec![
            step("a", "g2", false),
            step("b", "g1", false),
            step("c", "g2", false),
            step("d", "g3", true),
        ]);
        let plan = plan_execution(&p);
        let ids: Vec<&str> = plan.groups.iter().map(|g| g.group_id.as_str()).collect();
        assert_eq!(ids, vec!["g2", "g1", "g3"]);
        assert_eq!(plan.groups[0].steps.len(), 2);
        assert!(plan.groups[0].can_run_parallel);
        assert!(!plan.groups[1].can_run_parallel);
        assert!(plan.groups[2].is_blocking);
        assert_eq!(plan.step_count(), 4);
    }

    #[test]
    fn test_plan_parallel_flag_randomized() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let n = rng.gen_range(1..12);
            let steps: Vec<WorkflowStep> = (0..n)
                .map(|i| {
                    let group = format!("g{}", rng.gen_range(0..4));
                    step(&format!("s{i}"), &group, rng.gen_bool(0.3))
                })
                .collect();
            let p = pattern(steps.clone());
            let plan = plan_execution(&p);

            let mut expected_order: Vec<&str> = Vec::new();
            for s in &steps {
                if !expected_order.contains(&s.group_id.as_str()) {
                    expected_order.push(&s.group_id);
                }
            }
            let order: Vec<&str> = plan.groups.iter().map(|g| g.group_id.as_str()).collect();
            assert_eq!(order, expected_order);
            assert_eq!(plan.step_count(), steps.len());

            for group in &plan.groups {
                let blocking = group.steps.iter().any(|s| s.is_blocking);
                assert_eq!(group.is_blocking, blocking);
                assert_eq!(group.can_run_parallel, group.steps.len() >= 2 && !blocking);
            }
        }
    }

    #[test]
    fn test_instantiate_substitutes_vars_then_artifacts() {
        let mut s = step("write", "g1", false);
        s.objective_template = "Write about {{topic}} using {{notes}}".to_string();
        s.input_artifacts = vec!["notes".to_string(), "missing".to_string()];
        s.output_artifacts = vec!["draft".to_string()];

        let mut context = WorkflowContext::default();
        context.variables.insert("topic".into(), "rust".into());
        context.input_documents.push(InputDocument {
            id: "brief".into(),
            content: "be concise".into(),
        });
        let mut artifacts = ArtifactMap::new();
        artifacts.insert("notes".into(), "NOTES TEXT".into());

        let req = instantiate_step(&s, &context, &artifacts, Some("strict"));
        assert_eq!(req.objective, "Write about rust using NOTES TEXT");
        let doc_ids: Vec<&str> = req.input_documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(doc_ids, vec!["brief", "notes"]);
        assert_eq!(req.expected_output_types, vec!["draft".to_string()]);
        assert_eq!(req.qa_profile.as_deref(), Some("strict"));
    }

    #[test]
    fn test_context_variable_wins_over_artifact() {
        let mut s = step("x", "g1", false);
        s.objective_template = "{{notes}}".to_string();
        s.input_artifacts = vec!["notes".to_string()];
        let mut context = WorkflowContext::default();
        context.variables.insert("notes".into(), "from context".into());
        let mut artifacts = ArtifactMap::new();
        artifacts.insert("notes".into(), "from artifact".into());
        let req = instantiate_step(&s, &context, &artifacts, None);
        assert_eq!(req.objective, "from context");
    }

    #[test]
    fn test_artifact_text_is_not_expanded_again() {
        let mut s = step("x", "g1", false);
        s.objective_template = "A={{a}} B={{b}} C={{unknown}}".to_string();
        s.input_artifacts = vec!["a".to_string(), "b".to_string()];
        let mut context = WorkflowContext::default();
        context.variables.insert("topic".into(), "keep {{a}} literal".into());
        let mut artifacts = ArtifactMap::new();
        artifacts.insert("a".into(), "literal {{b}}".into());
        artifacts.insert("b".into(), "BEE".into());

        // Same output on every call regardless of map iteration order.
        for _ in 0..16 {
            let req = instantiate_step(&s, &context, &artifacts, None);
            assert_eq!(req.objective, "A=literal {{b}} B=BEE C={{unknown}}");
        }

        s.objective_template = "{{topic}} and {{b".to_string();
        let req = instantiate_step(&s, &context, &artifacts, None);
        assert_eq!(req.objective, "keep {{a}} literal and {{b");
    }

    #[test]
    fn test_validate_flags_missing_inputs_and_outputs() {
        let mut first = step("first", "g1", true);
        first.input_artifacts = vec!["later".to_string()];
        first.output_artifacts = vec!["outline".to_string()];
        let mut second = step("second", "g1", true);
        second.input_artifacts = vec!["outline".to_string()];
        second.output_artifacts = vec!["later".to_string()];
        let mut p = pattern(vec![first, second]);
        p.expected_artifacts = vec!["outline".to_string(), "report".to_string()];

        let report = validate_pattern(&p);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].contains("'later'"));
        assert!(report.errors[1].contains("'report'"));
    }

    #[test]
    fn test_validate_accepts_forward_flow() {
        let mut a = step("a", "g1", false);
        a.output_artifacts = vec!["notes".to_string()];
        let mut b = step("b", "g2", false);
        b.input_artifacts = vec!["notes".to_string()];
        b.output_artifacts = vec!["report".to_string()];
        let mut p = pattern(vec![a, b]);
        p.expected_artifacts = vec!["report".to_string()];
        let report = validate_pattern(&p);
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn test_validate_rejects_duplicate_step_ids() {
        let p = pattern(vec![step("a", "g1", false), step("a", "g2", false)]);
        let report = validate_pattern(&p);
        assert!(!report.valid);
        assert!(report.errors[0].contains("duplicate"));
    }

    #[tokio::test]
    async fn test_failure_in_parallel_group_stops_later_groups() {
        let (registry, sequencer) = sequencer();
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        registry.register_fn("echo", move |req: AgentRequest, _p: ProgressReporter| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                if req.objective == "do b" {
                    Err(TaskloomError::agent("invalid input"))
                } else {
                    Ok(AgentResponse::text(req.objective))
                }
            }
        });
        let mut a = step("a", "g1", false);
        a.output_artifacts = vec!["a_out".to_string()];
        let p = pattern(vec![a, step("b", "g1", false), step("c", "g2", false)]);

        let result = sequencer
            .execute_workflow(&p, &WorkflowContext::default(), &AuditContext::new("t"), &options())
            .await;
        assert!(!result.success);
        assert_eq!(result.failed_step.as_deref(), Some("b"));
        assert_eq!(result.step_results.len(), 2);
        assert_eq!(result.completed_steps, 1);
        assert_eq!(result.artifacts.get("a_out").map(String::as_str), Some("do a"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_blocking_group_stops_at_first_failure() {
        let (registry, sequencer) = sequencer();
        registry.register_fn("echo", |req: AgentRequest, _p: ProgressReporter| async move {
            if req.objective == "do a" {
                Err(TaskloomError::agent("policy violation"))
            } else {
                Ok(AgentResponse::text("fine"))
            }
        });
        let p = pattern(vec![step("a", "g1", true), step("b", "g1", true)]);
        let result = sequencer
            .execute_workflow(&p, &WorkflowContext::default(), &AuditContext::new("t"), &options())
            .await;
        assert!(!result.success);
        assert_eq!(result.failed_step.as_deref(), Some("a"));
        assert_eq!(result.step_results.len(), 1);
        assert_eq!(result.completed_steps, 0);
    }

    #[tokio::test]
    async fn test_unknown_agent_type_fails_step() {
        let (_registry, sequencer) = sequencer();
        let p = pattern(vec![step("a", "g1", false)]);
        let result = sequencer
            .execute_workflow(&p, &WorkflowContext::default(), &AuditContext::new("t"), &options())
            .await;
        assert!(!result.success);
        assert!(result.step_results[0].run_id.is_none());
        assert!(result.step_results[0].error.as_ref().unwrap().contains("echo"));
    }
}
