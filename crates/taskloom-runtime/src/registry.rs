//! Registry of agent implementations, keyed by agent type.
//!
//! Constructed once at startup and shared by reference with the executor.
//! Thread-safe via `DashMap`.

use crate::observer::ProgressReporter;
use async_trait::async_trait;
use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use taskloom_types::error::TaskloomResult;
use taskloom_types::run::{AgentRequest, AgentResponse};
use tracing::info;

/// An agent that turns a request into a response.
#[async_trait]
pub trait AgentImplementation: Send + Sync {
    /// Execute one attempt. Long-running implementations should call
    /// `progress.report(..)?` periodically so hard timeouts can fire.
    async fn run(
        &self,
        request: &AgentRequest,
        progress: &ProgressReporter,
    ) -> TaskloomResult<AgentResponse>;

    /// Downstream dependency guarded by the circuit breaker (e.g. the LLM
    /// provider). Defaults to the agent type.
    fn dependency(&self) -> Option<&str> {
        None
    }
}

/// Adapter turning an async closure into an [`AgentImplementation`].
pub struct FnAgent<F> {
    func: F,
    dependency: Option<String>,
}

impl<F> FnAgent<F> {
    pub fn new(func: F) -> Self {
        Self {
            func,
            dependency: None,
        }
    }

    /// Route breaker accounting to a named dependency.
    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependency = Some(dependency.into());
        self
    }
}

#[async_trait]
impl<F, Fut> AgentImplementation for FnAgent<F>
where
    F: Fn(AgentRequest, ProgressReporter) -> Fut + Send + Sync,
    Fut: Future<Output = TaskloomResult<AgentResponse>> + Send,
{
    async fn run(
        &self,
        request: &AgentRequest,
        progress: &ProgressReporter,
    ) -> TaskloomResult<AgentResponse> {
        (self.func)(request.clone(), progress.clone()).await
    }

    fn dependency(&self) -> Option<&str> {
        self.dependency.as_deref()
    }
}

/// Agent type to implementation map.
#[derive(Default)]
pub struct AgentRegistry {
    implementations: DashMap<String, Arc<dyn AgentImplementation>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the implementation for an agent type.
    pub fn register(&self, agent_type: impl Into<String>, implementation: Arc<dyn AgentImplementation>) {
        let agent_type = agent_type.into();
        info!(agent_type = %agent_type, "Agent implementation registered");
        self.implementations.insert(agent_type, implementation);
    }

    /// Register an async closure.
    pub fn register_fn<F, Fut>(&self, agent_type: impl Into<String>, func: F)
    where
        F: Fn(AgentRequest, ProgressReporter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TaskloomResult<AgentResponse>> + Send + 'static,
    {
        self.register(agent_type, Arc::new(FnAgent::new(func)));
    }

    pub fn lookup(&self, agent_type: &str) -> Option<Arc<dyn AgentImplementation>> {
        self.implementations.get(agent_type).map(|r| Arc::clone(r.value()))
    }

    pub fn unregister(&self, agent_type: &str) -> bool {
        self.implementations.remove(agent_type).is_some()
    }

    /// Registered agent types, sorted.
    pub fn agent_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.implementations.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NoopObserver;
    use taskloom_types::config::RetryPolicy;
    use taskloom_types::run::RunId;

    #[tokio::test]
    async fn test_register_and_lookup_fn_agent() {
        let registry = AgentRegistry::new();
        registry.register_fn("echo", |req: AgentRequest, _p: ProgressReporter| async move {
            Ok(AgentResponse::text(format!("echo: {}", req.objective)))
        });

        let agent = registry.lookup("echo").unwrap();
        let reporter =
            ProgressReporter::new(RunId::new(), RetryPolicy::default(), Arc::new(NoopObserver));
        let resp = agent
            .run(&AgentRequest::new("echo", "hello"), &reporter)
            .await
            .unwrap();
        assert_eq!(resp.output, "echo: hello");
        assert!(agent.dependency().is_none());
    }

    #[test]
    fn test_lookup_missing_and_unregister() {
        let registry = AgentRegistry::new();
        assert!(registry.lookup("ghost").is_none());
        registry.register(
            "writer",
            Arc::new(
                FnAgent::new(|_r: AgentRequest, _p: ProgressReporter| async {
                    Ok(AgentResponse::default())
                })
                .with_dependency("anthropic"),
            ),
        );
        assert_eq!(registry.agent_types(), vec!["writer".to_string()]);
        assert_eq!(
            registry.lookup("writer").unwrap().dependency(),
            Some("anthropic")
        );
        assert!(registry.unregister("writer"));
        assert!(!registry.unregister("writer"));
    }
}
