//! Kernel-specific error types.

use taskloom_types::error::TaskloomError;
use thiserror::Error;

/// Kernel error type wrapping TaskloomError with kernel-specific context.
#[derive(Error, Debug)]
pub enum KernelError {
    /// A wrapped TaskloomError.
    #[error(transparent)]
    Taskloom(#[from] TaskloomError),

    /// The kernel failed to boot.
    #[error("Boot failed: {0}")]
    BootFailed(String),

    /// A workflow pattern failed static validation.
    #[error("Invalid pattern '{name}': {}", errors.join("; "))]
    InvalidPattern { name: String, errors: Vec<String> },

    /// No pattern registered under this name.
    #[error("Pattern not found: {0}")]
    PatternNotFound(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_pattern_message_lists_errors() {
        let err = KernelError::InvalidPattern {
            name: "research".into(),
            errors: vec!["a".into(), "b".into()],
        };
        assert_eq!(err.to_string(), "Invalid pattern 'research': a; b");
    }

    #[test]
    fn test_wrapped_error_is_transparent() {
        let err: KernelError = TaskloomError::RunNotFound("r1".into()).into();
        assert_eq!(err.to_string(), "Run not found: r1");
    }
}
