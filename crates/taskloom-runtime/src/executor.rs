//! Runs one agent request to completion.
//!
//! Per request: look up the implementation, create a run record, then loop
//! START -> invoke -> COMPLETE, or FAIL/HARD_TIMEOUT -> retry decision ->
//! RETRY with backoff. Every transition goes through the lifecycle machine
//! and is persisted before the loop proceeds.
//!
//! `execute` never returns an error; all failure information is carried in
//! the [`ExecutionResult`].

use crate::circuit_breaker::{BreakerVerdict, CircuitBreaker};
use crate::classify::{ErrorClassifier, KeywordClassifier};
use crate::lifecycle::{LifecycleEvent, LifecycleMachine, TransitionOutcome};
use crate::observer::{NoopObserver, ProgressReporter, RunObserver};
use crate::registry::{AgentImplementation, AgentRegistry};
use crate::retry;
use crate::store::{RunPatch, RunStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use taskloom_types::config::RetryPolicy;
use taskloom_types::error::{TaskloomError, TaskloomResult};
use taskloom_types::event::RunEvent;
use taskloom_types::run::{AgentRequest, AgentResponse, AgentRun, AuditContext, RunId, RunStatus};
use tracing::{debug, error, info, warn};

/// Per-call execution options.
#[derive(Clone)]
pub struct ExecuteOptions {
    pub retry_policy: RetryPolicy,
    pub observer: Arc<dyn RunObserver>,
}

impl ExecuteOptions {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self {
            retry_policy,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// Outcome of one `execute` call.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Final run record. `None` when no run was created.
    pub run: Option<AgentRun>,
    pub response: Option<AgentResponse>,
    pub success: bool,
    pub error: Option<String>,
    /// Whether any attempt failed before the final one.
    pub was_retried: bool,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    fn failure(run: Option<AgentRun>, error: String, was_retried: bool, started: Instant) -> Self {
        Self {
            run,
            response: None,
            success: false,
            error: Some(error),
            was_retried,
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.run.as_ref().map(|r| r.id)
    }
}

/// Drives agent runs through their lifecycle.
pub struct Executor {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn RunStore>,
    classifier: Arc<dyn ErrorClassifier>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl Executor {
    pub fn new(registry: Arc<AgentRegistry>, store: Arc<dyn RunStore>) -> Self {
        Self {
            registry,
            store,
            classifier: Arc::new(KeywordClassifier),
            breaker: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Gate runs on a shared circuit breaker.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Execute one request to a terminal outcome.
    pub async fn execute(
        &self,
        request: AgentRequest,
        audit: &AuditContext,
        options: &ExecuteOptions,
    ) -> ExecutionResult {
        let started = Instant::now();

        let Some(implementation) = self.registry.lookup(&request.agent_type) else {
            let err = TaskloomError::UnknownAgentType(request.agent_type.clone());
            warn!(agent_type = %request.agent_type, "No implementation registered");
            return ExecutionResult::failure(None, err.to_string(), false, started);
        };

        let dependency = implementation
            .dependency()
            .unwrap_or(&request.agent_type)
            .to_string();

        let mut probe = false;
        if let Some(breaker) = &self.breaker {
            match breaker.check(&dependency) {
                BreakerVerdict::Reject { retry_after_secs } => {
                    let err = TaskloomError::CircuitOpen {
                        dependency,
                        retry_after_secs,
                    };
                    warn!(agent_type = %request.agent_type, error = %err, "Run rejected by circuit breaker");
                    return ExecutionResult::failure(None, err.to_string(), false, started);
                }
                BreakerVerdict::AllowProbe => probe = true,
                BreakerVerdict::Allow => {}
            }
        }

        let run = match self.store.create(&request, audit).await {
            Ok(run) => run,
            Err(e) => {
                error!(agent_type = %request.agent_type, error = %e, "Failed to create run record");
                self.release_probe(probe, &dependency);
                return ExecutionResult::failure(None, e.to_string(), false, started);
            }
        };
        let run_id = run.id;

        let mut attempt = Attempt {
            run,
            was_retried: false,
            probe_pending: probe,
        };
        let result = match self
            .drive(&implementation, &dependency, &mut attempt, audit, options, started)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Run aborted by store failure");
                let run = self.store.get(run_id).await.ok().flatten();
                ExecutionResult::failure(run, e.to_string(), attempt.was_retried, started)
            }
        };
        // A probe that ended without success or a transient failure must not
        // hold the half-open slot.
        self.release_probe(attempt.probe_pending, &dependency);
        result
    }

    fn release_probe(&self, pending: bool, dependency: &str) {
        if !pending {
            return;
        }
        if let Some(breaker) = &self.breaker {
            breaker.release_probe(dependency);
        }
    }

    /// The attempt loop. Store errors bubble up; everything else becomes a
    /// result.
    async fn drive(
        &self,
        implementation: &Arc<dyn AgentImplementation>,
        dependency: &str,
        attempt: &mut Attempt,
        audit: &AuditContext,
        options: &ExecuteOptions,
        started: Instant,
    ) -> TaskloomResult<ExecutionResult> {
        let policy = &options.retry_policy;
        let observer = &options.observer;
        let machine = LifecycleMachine::new(policy.max_retries);

        loop {
            let run_id = attempt.run.id;
            checked(
                attempt.run.status,
                machine.transition(attempt.run.status, attempt.run.retry_count, &LifecycleEvent::Start),
            )?;
            attempt.run = self.store.start(run_id, audit).await?;

            info!(
                run_id = %run_id,
                agent_type = %attempt.run.agent_type,
                attempt = attempt.run.retry_count + 1,
                "Run started"
            );
            observer.on_event(&RunEvent::Started {
                run_id,
                agent_type: attempt.run.agent_type.clone(),
                attempt: attempt.run.retry_count + 1,
            });
            let reporter = ProgressReporter::new(run_id, *policy, Arc::clone(observer));
            reporter.emit(Some("Starting"), Some(0), false);

            let request = attempt.run.request.clone();
            match implementation.run(&request, &reporter).await {
                Ok(response) => {
                    checked(
                        attempt.run.status,
                        machine.transition(
                            attempt.run.status,
                            attempt.run.retry_count,
                            &LifecycleEvent::Complete,
                        ),
                    )?;
                    reporter.emit(Some("Finalizing"), Some(95), false);
                    attempt.run = self.store.complete(run_id, response.clone(), audit).await?;

                    if let Some(breaker) = &self.breaker {
                        breaker.record_success(dependency);
                        attempt.probe_pending = false;
                    }
                    let execution_time_ms = started.elapsed().as_millis() as u64;
                    info!(run_id = %run_id, execution_time_ms, was_retried = attempt.was_retried, "Run completed");
                    observer.on_event(&RunEvent::Completed {
                        run_id,
                        execution_time_ms,
                    });
                    reporter.emit(Some("Completed"), Some(100), true);

                    return Ok(ExecutionResult {
                        run: Some(attempt.run.clone()),
                        response: Some(response),
                        success: true,
                        error: None,
                        was_retried: attempt.was_retried,
                        execution_time_ms,
                    });
                }
                Err(err) => {
                    let hard_timeout = err.is_hard_timeout();
                    let classified = self.classifier.classify_error(&err.to_string());
                    let transient = classified.is_transient();

                    warn!(
                        run_id = %run_id,
                        retry_count = attempt.run.retry_count,
                        transient,
                        hard_timeout,
                        error = %classified.message,
                        "Run attempt failed"
                    );
                    observer.on_event(&RunEvent::Failed {
                        run_id,
                        error: classified.message.clone(),
                        transient,
                    });
                    if transient {
                        if let Some(breaker) = &self.breaker {
                            breaker.record_failure(dependency);
                            attempt.probe_pending = false;
                        }
                    }

                    let decision = retry::should_retry(
                        &attempt.run,
                        &classified.message,
                        policy,
                        self.classifier.as_ref(),
                    );

                    // Hard timeouts park the run in `blocked`; other failures
                    // move it to `failed`.
                    let failed_state = if hard_timeout {
                        let outcome = machine.transition(
                            attempt.run.status,
                            attempt.run.retry_count,
                            &LifecycleEvent::HardTimeout,
                        );
                        attempt.run = self.store.block(run_id, &classified.message, audit).await?;
                        observer.on_event(&RunEvent::Blocked {
                            run_id,
                            reason: classified.message.clone(),
                        });
                        outcome.state
                    } else {
                        let outcome = machine.transition(
                            attempt.run.status,
                            attempt.run.retry_count,
                            &LifecycleEvent::Fail {
                                error: classified.message.clone(),
                                is_transient: transient,
                            },
                        );
                        debug!(
                            run_id = %run_id,
                            should_retry = outcome.should_retry,
                            should_escalate = outcome.should_escalate,
                            "Failure transition applied"
                        );
                        outcome.state
                    };

                    if decision.should_retry {
                        let retried =
                            machine.transition(failed_state, attempt.run.retry_count, &LifecycleEvent::Retry);
                        if retried.state == RunStatus::Pending {
                            let retry_count = attempt.run.retry_count + 1;
                            let delay_ms = decision.delay_ms.unwrap_or(0);
                            attempt.run = self
                                .store
                                .update(
                                    run_id,
                                    RunPatch::status(RunStatus::Pending)
                                        .with_retry_count(retry_count)
                                        .with_error(classified.message.clone()),
                                    audit,
                                )
                                .await?;
                            attempt.was_retried = true;

                            info!(run_id = %run_id, retry_count, delay_ms, "Retrying run after backoff");
                            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                            observer.on_event(&RunEvent::Retrying {
                                run_id,
                                retry_count,
                                delay_ms,
                            });
                            continue;
                        }
                    }

                    // Out of retries or not retryable: escalate.
                    if !hard_timeout {
                        let retry_count = (attempt.run.retry_count + 1).min(policy.max_retries);
                        attempt.run = self
                            .store
                            .fail(run_id, &classified.message, retry_count, audit)
                            .await?;
                    }
                    observer.on_event(&RunEvent::Escalated {
                        run_id,
                        reason: decision.reason.clone(),
                    });
                    info!(
                        run_id = %run_id,
                        status = %attempt.run.status,
                        reason = %decision.reason,
                        "Run escalated"
                    );

                    return Ok(ExecutionResult::failure(
                        Some(attempt.run.clone()),
                        classified.message,
                        attempt.was_retried,
                        started,
                    ));
                }
            }
        }
    }

    /// Execute every request concurrently and collect all results, in input
    /// order. Individual failures are reported, never swallowed.
    pub async fn execute_parallel(
        &self,
        requests: Vec<AgentRequest>,
        audit: &AuditContext,
        options: &ExecuteOptions,
    ) -> Vec<ExecutionResult> {
        debug!(count = requests.len(), "Executing requests in parallel");
        let futures = requests
            .into_iter()
            .map(|request| self.execute(request, audit, options));
        futures::future::join_all(futures).await
    }

    /// Execute requests one at a time, stopping after the first failure.
    pub async fn execute_sequential(
        &self,
        requests: Vec<AgentRequest>,
        audit: &AuditContext,
        options: &ExecuteOptions,
    ) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            let result = self.execute(request, audit, options).await;
            let failed = !result.success;
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }

    /// Replay a stored run's original request as a fresh execution. Used for
    /// manual retry after escalation or a block.
    pub async fn retry_run(
        &self,
        run_id: RunId,
        audit: &AuditContext,
        options: &ExecuteOptions,
    ) -> ExecutionResult {
        let started = Instant::now();
        let run = match self.store.get(run_id).await {
            Ok(Some(run)) => run,
            Ok(None) => {
                let err = TaskloomError::RunNotFound(run_id.to_string());
                return ExecutionResult::failure(None, err.to_string(), false, started);
            }
            Err(e) => return ExecutionResult::failure(None, e.to_string(), false, started),
        };
        if !matches!(run.status, RunStatus::Failed | RunStatus::Blocked) {
            let msg = format!("run {run_id} is {} and cannot be retried", run.status);
            return ExecutionResult::failure(Some(run), msg, false, started);
        }
        info!(run_id = %run_id, agent_type = %run.agent_type, "Replaying run request");
        self.execute(run.request, audit, options).await
    }
}

struct Attempt {
    run: AgentRun,
    was_retried: bool,
    /// Admitted as the half-open probe and not yet resolved.
    probe_pending: bool,
}

/// Turn a rejected transition into an error.
fn checked(from: RunStatus, outcome: TransitionOutcome) -> TaskloomResult<TransitionOutcome> {
    match outcome.error {
        Some(err) => Err(TaskloomError::InvalidTransition {
            from: from.to_string(),
            event: err,
        }),
        None => Ok(outcome),
    }
}
