//! The kernel boots the shared runtime pieces once and owns the named
//! pattern registry.

use crate::config::{load_config, load_patterns_dir};
use crate::error::{KernelError, KernelResult};
use crate::event_bus::EventBus;
use crate::workflow::{plan_execution, validate_pattern, WorkflowSequencer};
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use taskloom_runtime::circuit_breaker::CircuitBreaker;
use taskloom_runtime::executor::{ExecuteOptions, ExecutionResult, Executor};
use taskloom_runtime::registry::AgentRegistry;
use taskloom_runtime::store::InMemoryRunStore;
use taskloom_types::config::KernelConfig;
use taskloom_types::run::{AgentRequest, AuditContext, RunId};
use taskloom_types::workflow::{ExecutionPlan, WorkflowContext, WorkflowPattern, WorkflowResult};
use tracing::{info, warn};

pub struct TaskloomKernel {
    config: KernelConfig,
    registry: Arc<AgentRegistry>,
    store: Arc<InMemoryRunStore>,
    breaker: Option<Arc<CircuitBreaker>>,
    event_bus: Arc<EventBus>,
    executor: Arc<Executor>,
    sequencer: WorkflowSequencer,
    patterns: DashMap<String, WorkflowPattern>,
}

impl TaskloomKernel {
    /// Boot from `~/.taskloom/config.toml` or an explicit path.
    pub fn boot(config_path: Option<&Path>) -> KernelResult<Self> {
        Self::boot_with_config(load_config(config_path))
    }

    /// Boot with an already-loaded configuration.
    pub fn boot_with_config(config: KernelConfig) -> KernelResult<Self> {
        let registry = Arc::new(AgentRegistry::new());
        let store = Arc::new(InMemoryRunStore::new());
        let event_bus = Arc::new(EventBus::with_history(config.event_history));

        let mut executor = Executor::new(registry.clone(), store.clone());
        let breaker = if config.circuit_breaker.enabled {
            let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));
            executor = executor.with_circuit_breaker(breaker.clone());
            Some(breaker)
        } else {
            None
        };
        let executor = Arc::new(executor);
        let sequencer = WorkflowSequencer::new(executor.clone());

        let kernel = Self {
            config,
            registry,
            store,
            breaker,
            event_bus,
            executor,
            sequencer,
            patterns: DashMap::new(),
        };

        if let Some(dir) = kernel.config.patterns_dir.clone() {
            let patterns = load_patterns_dir(&dir).map_err(|e| {
                KernelError::BootFailed(format!("patterns dir {}: {e}", dir.display()))
            })?;
            for pattern in patterns {
                let name = pattern.name.clone();
                if let Err(e) = kernel.register_pattern(pattern) {
                    warn!(pattern = %name, error = %e, "Skipping invalid pattern");
                }
            }
        }

        info!(
            breaker = kernel.breaker.is_some(),
            patterns = kernel.patterns.len(),
            max_retries = kernel.config.retry.max_retries,
            "Taskloom kernel booted"
        );
        Ok(kernel)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Registry agents are registered into.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<InMemoryRunStore> {
        &self.store
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Options built from the configured retry policy, observed by the bus.
    pub fn execute_options(&self) -> ExecuteOptions {
        ExecuteOptions::new(self.config.retry).with_observer(self.event_bus.clone())
    }

    /// Execute one request with the kernel's defaults.
    pub async fn execute(&self, request: AgentRequest, audit: &AuditContext) -> ExecutionResult {
        self.executor
            .execute(request, audit, &self.execute_options())
            .await
    }

    /// Manually retry a failed or blocked run.
    pub async fn retry_run(&self, run_id: RunId, audit: &AuditContext) -> ExecutionResult {
        self.executor
            .retry_run(run_id, audit, &self.execute_options())
            .await
    }

    /// Validate and register (or replace) a named pattern.
    pub fn register_pattern(&self, pattern: WorkflowPattern) -> KernelResult<()> {
        let report = validate_pattern(&pattern);
        if !report.valid {
            return Err(KernelError::InvalidPattern {
                name: pattern.name,
                errors: report.errors,
            });
        }
        info!(pattern = %pattern.name, steps = pattern.steps.len(), "Workflow pattern registered");
        self.patterns.insert(pattern.name.clone(), pattern);
        Ok(())
    }

    pub fn get_pattern(&self, name: &str) -> Option<WorkflowPattern> {
        self.patterns.get(name).map(|p| p.value().clone())
    }

    /// Registered pattern names, sorted.
    pub fn list_patterns(&self) -> Vec<String> {
        let mut names: Vec<String> = self.patterns.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn remove_pattern(&self, name: &str) -> bool {
        self.patterns.remove(name).is_some()
    }

    /// Execution plan for a registered pattern.
    pub fn plan(&self, name: &str) -> KernelResult<ExecutionPlan> {
        let pattern = self
            .get_pattern(name)
            .ok_or_else(|| KernelError::PatternNotFound(name.to_string()))?;
        Ok(plan_execution(&pattern))
    }

    /// Execute an arbitrary pattern with the kernel's defaults.
    pub async fn run_workflow(
        &self,
        pattern: &WorkflowPattern,
        context: &WorkflowContext,
        audit: &AuditContext,
    ) -> WorkflowResult {
        self.sequencer
            .execute_workflow(pattern, context, audit, &self.execute_options())
            .await
    }

    /// Execute a registered pattern by name.
    pub async fn run_pattern(
        &self,
        name: &str,
        context: &WorkflowContext,
        audit: &AuditContext,
    ) -> KernelResult<WorkflowResult> {
        let pattern = self
            .get_pattern(name)
            .ok_or_else(|| KernelError::PatternNotFound(name.to_string()))?;
        Ok(self.run_workflow(&pattern, context, audit).await)
    }
}
