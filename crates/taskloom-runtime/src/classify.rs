//! Failure classification: transient (worth one retry) versus semantic.
//!
//! Classification is substring matching on the error message. It sits behind
//! the [`ErrorClassifier`] trait so typed error codes can replace it without
//! touching the state machine or the retry policy.

use serde::{Deserialize, Serialize};

/// Case-insensitive markers of a transient failure.
const TRANSIENT_MARKERS: &[&str] = &[
    "timeout",
    "timed out",
    "network",
    "connection",
    "rate limit",
    "rate_limit",
    "429",
    "500",
    "502",
    "503",
    "504",
    "temporarily",
    "retry",
    "econnreset",
    "econnrefused",
    "etimedout",
    "enotfound",
    "eai_again",
    "socket hang up",
];

/// Failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Likely to succeed on retry.
    Transient,
    /// Unlikely to succeed on retry.
    Semantic,
}

/// A classified failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ClassifiedError {
    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

/// Decides whether an error message describes a transient failure.
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, message: &str) -> ErrorKind;

    /// Classify and keep the message.
    fn classify_error(&self, message: &str) -> ClassifiedError {
        ClassifiedError {
            kind: self.classify(message),
            message: message.to_string(),
        }
    }
}

/// The default keyword-table classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl ErrorClassifier for KeywordClassifier {
    fn classify(&self, message: &str) -> ErrorKind {
        if is_transient_message(message) {
            ErrorKind::Transient
        } else {
            ErrorKind::Semantic
        }
    }
}

/// True if `message` contains any transient marker (case-insensitive).
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_MARKERS.iter().any(|m| lower.contains(m))
}
