//! Pattern commands: validate, plan, run, and list.

use crate::ui;
use anyhow::{bail, Context};
use std::path::Path;
use taskloom_kernel::config::load_pattern_file;
use taskloom_kernel::workflow::{plan_execution, validate_pattern};
use taskloom_kernel::TaskloomKernel;
use taskloom_runtime::observer::ProgressReporter;
use taskloom_types::config::KernelConfig;
use taskloom_types::error::TaskloomError;
use taskloom_types::run::{AgentRequest, AgentResponse, AuditContext};
use taskloom_types::workflow::{WorkflowContext, WorkflowPattern};
use tracing::info;

fn load(file: &Path) -> anyhow::Result<WorkflowPattern> {
    load_pattern_file(file).with_context(|| format!("loading pattern {}", file.display()))
}

pub fn cmd_validate(file: &Path, json: bool) -> anyhow::Result<()> {
    let pattern = load(file)?;
    let report = validate_pattern(&pattern);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        ui::section(&format!("Pattern '{}'", pattern.name));
        if report.valid {
            ui::check_ok(&format!("{} steps, artifact flow is valid", pattern.steps.len()));
        }
        for error in &report.errors {
            ui::check_fail(error);
        }
    }

    if !report.valid {
        bail!("pattern '{}' has {} error(s)", pattern.name, report.errors.len());
    }
    Ok(())
}

pub fn cmd_plan(file: &Path, json: bool) -> anyhow::Result<()> {
    let pattern = load(file)?;
    let plan = plan_execution(&pattern);

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    ui::section(&format!("Execution plan for '{}'", pattern.name));
    for (i, group) in plan.groups.iter().enumerate() {
        let mode = if group.can_run_parallel {
            "parallel"
        } else if group.is_blocking {
            "blocking"
        } else {
            "sequential"
        };
        ui::kv(&format!("Group {}", i + 1), &format!("{} ({mode})", group.group_id));
        for step in &group.steps {
            println!("      - {} [{}]", step.step_id, step.agent_type);
        }
    }
    Ok(())
}

pub async fn cmd_run(
    config: KernelConfig,
    file: &Path,
    vars: Vec<(String, String)>,
    fail: Option<(String, String)>,
    json: bool,
) -> anyhow::Result<()> {
    let pattern = load(file)?;
    let kernel = TaskloomKernel::boot_with_config(config)?;
    info!(pattern = %pattern.name, steps = pattern.steps.len(), "Dry-running workflow with echo agents");

    let mut agent_types: Vec<&str> = pattern.steps.iter().map(|s| s.agent_type.as_str()).collect();
    agent_types.sort_unstable();
    agent_types.dedup();
    for agent_type in agent_types {
        let failure = fail
            .as_ref()
            .filter(|(target, _)| target == agent_type)
            .map(|(_, error)| error.clone());
        kernel
            .registry()
            .register_fn(agent_type, move |req: AgentRequest, progress: ProgressReporter| {
                let failure = failure.clone();
                async move {
                    progress.report(Some(50), Some("echoing objective"))?;
                    match failure {
                        Some(error) => Err(TaskloomError::agent(error)),
                        None => Ok(AgentResponse::text(req.objective)),
                    }
                }
            });
    }

    let context = WorkflowContext {
        variables: vars.into_iter().collect(),
        ..WorkflowContext::default()
    };
    let audit = AuditContext::new("taskloom-cli").with_correlation(pattern.name.clone());
    let result = kernel.run_workflow(&pattern, &context, &audit).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        ui::section(&format!("Run of '{}'", pattern.name));
        for step in &result.step_results {
            let retried = if step.was_retried { ", retried" } else { "" };
            let line = format!("{} ({}ms{retried})", step.step_id, step.execution_time_ms);
            if step.success {
                ui::check_ok(&line);
            } else {
                ui::check_fail(&format!(
                    "{line}: {}",
                    step.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
        let mut names: Vec<&String> = result.artifacts.keys().collect();
        names.sort();
        for name in names {
            ui::kv(name, &result.artifacts[name]);
        }
        ui::kv("Completed", &format!("{}/{}", result.completed_steps, pattern.steps.len()));
        ui::kv("Total", &format!("{}ms", result.total_time_ms));
    }

    if let Some(step) = result.failed_step {
        bail!("workflow '{}' failed at step '{step}'", pattern.name);
    }
    Ok(())
}

pub fn cmd_patterns(config: KernelConfig, json: bool) -> anyhow::Result<()> {
    if config.patterns_dir.is_none() {
        ui::hint("set `patterns_dir` in ~/.taskloom/config.toml to load patterns at boot");
        return Ok(());
    }
    let kernel = TaskloomKernel::boot_with_config(config)?;
    let names = kernel.list_patterns();

    if json {
        println!("{}", serde_json::to_string_pretty(&names)?);
    } else if names.is_empty() {
        println!("No valid patterns found.");
    } else {
        ui::section("Patterns");
        for name in names {
            let steps = kernel.get_pattern(&name).map(|p| p.steps.len()).unwrap_or(0);
            ui::kv(&name, &format!("{steps} steps"));
        }
    }
    Ok(())
}
