//! Retry policy: eligibility, exponential backoff with jitter, and timeouts.
//!
//! Backoff formula: `min(base * 2^retry_count, max)` with symmetric ±20%
//! jitter, floored to whole milliseconds.

use crate::classify::ErrorClassifier;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use taskloom_types::config::RetryPolicy;
use taskloom_types::run::AgentRun;
use tracing::debug;

/// Symmetric jitter fraction applied to the backoff delay.
const JITTER_FRACTION: f64 = 0.2;

// ---------------------------------------------------------------------------
// Retry decision
// ---------------------------------------------------------------------------

/// Whether a failed run should be retried, and after how long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryDecision {
    pub should_retry: bool,
    /// Backoff delay when approved.
    pub delay_ms: Option<u64>,
    pub reason: String,
}

/// Decide whether `run` may be retried after failing with `error`.
pub fn should_retry(
    run: &AgentRun,
    error: &str,
    policy: &RetryPolicy,
    classifier: &dyn ErrorClassifier,
) -> RetryDecision {
    if run.retry_count >= policy.max_retries {
        return RetryDecision {
            should_retry: false,
            delay_ms: None,
            reason: "max retries exceeded".to_string(),
        };
    }

    let classified = classifier.classify_error(error);
    if !classified.is_transient() {
        return RetryDecision {
            should_retry: false,
            delay_ms: None,
            reason: format!("non-retryable error: {}", classified.message),
        };
    }

    let delay_ms = calculate_backoff(run.retry_count, policy);
    debug!(
        run_id = %run.id,
        retry_count = run.retry_count,
        delay_ms,
        "retry approved for transient failure"
    );
    RetryDecision {
        should_retry: true,
        delay_ms: Some(delay_ms),
        reason: format!("transient error, retrying in {delay_ms}ms"),
    }
}

// ---------------------------------------------------------------------------
// Backoff computation
// ---------------------------------------------------------------------------

/// Un-jittered delay: `min(base * 2^retry_count, max)`.
pub fn base_backoff(retry_count: u32, policy: &RetryPolicy) -> u64 {
    policy
        .backoff_base_ms
        .saturating_mul(1u64.checked_shl(retry_count).unwrap_or(u64::MAX))
        .min(policy.backoff_max_ms)
}

/// Backoff delay for the given retry count, with random jitter.
pub fn calculate_backoff(retry_count: u32, policy: &RetryPolicy) -> u64 {
    let sample: f64 = rand::thread_rng().gen_range(-1.0..=1.0);
    calculate_backoff_with_jitter(retry_count, policy, sample)
}

/// Backoff delay with an explicit jitter sample in `[-1, 1]`.
pub fn calculate_backoff_with_jitter(retry_count: u32, policy: &RetryPolicy, sample: f64) -> u64 {
    let delay = base_backoff(retry_count, policy) as f64;
    let jitter = delay * JITTER_FRACTION * sample.clamp(-1.0, 1.0);
    (delay + jitter).max(0.0).floor() as u64
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

/// Which timeout threshold an attempt has crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutKind {
    /// Advisory: still working.
    Soft,
    /// Abort the attempt.
    Hard,
}

/// Classify the time elapsed since `started`.
pub fn check_timeout(started: Instant, policy: &RetryPolicy) -> Option<TimeoutKind> {
    classify_elapsed(started.elapsed().as_millis() as u64, policy)
}

/// Classify an elapsed duration in milliseconds. Hard wins over soft.
pub fn classify_elapsed(elapsed_ms: u64, policy: &RetryPolicy) -> Option<TimeoutKind> {
    if elapsed_ms >= policy.hard_timeout_ms {
        Some(TimeoutKind::Hard)
    } else if elapsed_ms >= policy.soft_timeout_ms {
        Some(TimeoutKind::Soft)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::KeywordClassifier;
    use taskloom_types::run::AgentRequest;

    fn run_with_retries(retry_count: u32) -> AgentRun {
        let mut run = AgentRun::new(AgentRequest::new("writer", "draft"));
        run.retry_count = retry_count;
        run
    }

    #[test]
    fn test_refuses_when_budget_spent() {
        let decision = should_retry(
            &run_with_retries(1),
            "connection reset",
            &RetryPolicy::default(),
            &KeywordClassifier,
        );
        assert!(!decision.should_retry);
        assert_eq!(decision.reason, "max retries exceeded");
        assert!(decision.delay_ms.is_none());
    }

    #[test]
    fn test_refuses_semantic_errors_with_message() {
        let decision = should_retry(
            &run_with_retries(0),
            "invalid objective",
            &RetryPolicy::default(),
            &KeywordClassifier,
        );
        assert!(!decision.should_retry);
        assert!(decision.reason.contains("invalid objective"));
    }

    #[test]
    fn test_approves_transient_with_delay() {
        let decision = should_retry(
            &run_with_retries(0),
            "429 rate limited",
            &RetryPolicy::default(),
            &KeywordClassifier,
        );
        assert!(decision.should_retry);
        let delay = decision.delay_ms.unwrap();
        assert!((800..=1_200).contains(&delay), "delay {delay}");
    }

    #[test]
    fn test_backoff_without_jitter_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(calculate_backoff_with_jitter(0, &policy, 0.0), 1_000);
        assert_eq!(calculate_backoff_with_jitter(1, &policy, 0.0), 2_000);
        assert_eq!(calculate_backoff_with_jitter(3, &policy, 0.0), 8_000);
        assert_eq!(calculate_backoff_with_jitter(4, &policy, 0.0), 10_000);
        assert_eq!(calculate_backoff_with_jitter(63, &policy, 0.0), 10_000);
        assert_eq!(calculate_backoff_with_jitter(200, &policy, 0.0), 10_000);
    }

    #[test]
    fn test_backoff_jitter_extremes() {
        let policy = RetryPolicy::default();
        let low = calculate_backoff_with_jitter(0, &policy, -1.0);
        assert!((799..=800).contains(&low), "low {low}");
        let high = calculate_backoff_with_jitter(0, &policy, 1.0);
        assert!((1_199..=1_200).contains(&high), "high {high}");
        let capped = calculate_backoff_with_jitter(10, &policy, 1.0);
        assert!((11_999..=12_000).contains(&capped), "capped {capped}");
        // Samples outside [-1, 1] are clamped.
        assert_eq!(
            calculate_backoff_with_jitter(0, &policy, 7.0),
            calculate_backoff_with_jitter(0, &policy, 1.0)
        );
    }

    #[test]
    fn test_backoff_always_within_bounds() {
        let policy = RetryPolicy {
            backoff_base_ms: 250,
            backoff_max_ms: 5_000,
            ..RetryPolicy::default()
        };
        for n in 0..12 {
            let capped = base_backoff(n, &policy) as f64;
            for _ in 0..200 {
                let delay = calculate_backoff(n, &policy) as f64;
                assert!(delay >= (0.8 * capped).floor(), "n={n} delay={delay}");
                assert!(delay <= 1.2 * capped, "n={n} delay={delay}");
                assert!(delay <= 1.2 * policy.backoff_max_ms as f64);
            }
        }
    }

    #[test]
    fn test_classify_elapsed_thresholds() {
        let policy = RetryPolicy::default();
        assert_eq!(classify_elapsed(0, &policy), None);
        assert_eq!(classify_elapsed(29_999, &policy), None);
        assert_eq!(classify_elapsed(30_000, &policy), Some(TimeoutKind::Soft));
        assert_eq!(classify_elapsed(119_999, &policy), Some(TimeoutKind::Soft));
        assert_eq!(classify_elapsed(120_000, &policy), Some(TimeoutKind::Hard));
    }

    #[test]
    fn test_classify_elapsed_is_stable_for_same_input() {
        let policy = RetryPolicy::default();
        for elapsed in [5_000, 45_000, 200_000] {
            let first = classify_elapsed(elapsed, &policy);
            for _ in 0..10 {
                assert_eq!(classify_elapsed(elapsed, &policy), first);
            }
        }
    }

    #[test]
    fn test_check_timeout_fresh_start_is_none() {
        assert_eq!(check_timeout(Instant::now(), &RetryPolicy::default()), None);
    }
}
