//! Shared error types for Taskloom.

use thiserror::Error;

/// Top-level error type for the orchestration core.
#[derive(Error, Debug)]
pub enum TaskloomError {
    /// No implementation is registered for the requested agent type.
    #[error("No implementation registered for agent type: {0}")]
    UnknownAgentType(String),

    /// The requested run record was not found.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// A lifecycle transition was attempted from an invalid source state.
    #[error("Invalid transition: {event} from state '{from}'")]
    InvalidTransition {
        /// The state the run was in.
        from: String,
        /// The event that was rejected.
        event: String,
    },

    /// The attempt exceeded the hard timeout and was aborted.
    #[error("Hard timeout exceeded after {elapsed_ms}ms (limit {limit_ms}ms)")]
    HardTimeout {
        /// Elapsed time when the check fired.
        elapsed_ms: u64,
        /// The configured hard timeout.
        limit_ms: u64,
    },

    /// The agent implementation reported a failure.
    #[error("{0}")]
    Agent(String),

    /// The circuit breaker for a downstream dependency is open.
    #[error("Circuit open for dependency '{dependency}', retry after {retry_after_secs}s")]
    CircuitOpen {
        /// The protected dependency.
        dependency: String,
        /// Seconds until the breaker half-opens.
        retry_after_secs: u64,
    },

    /// A run-store operation failed.
    #[error("Run store error: {0}")]
    Store(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TaskloomError {
    /// Convenience constructor for implementation failures.
    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent(message.into())
    }

    /// Whether this error is the cooperative hard-timeout abort.
    pub fn is_hard_timeout(&self) -> bool {
        matches!(self, Self::HardTimeout { .. })
    }
}

/// Alias for Result with TaskloomError.
pub type TaskloomResult<T> = Result<T, TaskloomError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_timeout_message_mentions_timeout() {
        let err = TaskloomError::HardTimeout {
            elapsed_ms: 120_500,
            limit_ms: 120_000,
        };
        assert!(err.is_hard_timeout());
        assert!(err.to_string().to_lowercase().contains("timeout"));
    }

    #[test]
    fn test_agent_error_is_verbatim() {
        let err = TaskloomError::agent("invalid input: missing field");
        assert_eq!(err.to_string(), "invalid input: missing field");
        assert!(!err.is_hard_timeout());
    }
}
