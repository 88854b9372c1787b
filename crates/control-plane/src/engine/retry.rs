//! Retry policy evaluation for step/task command outcomes.
//!
//! `RetryPolicy` is shared by two layers: the orchestrator uses it to decide
//! whether a failed `action_error` event should re-enter a step (emitting
//! `action_retry`) or terminate the step, while
//! [`crate::services::queue::QueueService`] uses the same backoff formula to
//! compute a leased job's `available_at` when it requeues a failed job.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::evaluator::ConditionEvaluator;
use crate::error::AppResult;
use crate::playbook::types::{Step, StepSpec};

/// Resolved retry policy for a step, with defaults applied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub initial_delay: f64,
    pub backoff_multiplier: f64,
    pub max_delay: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: 0.0,
            backoff_multiplier: 2.0,
            max_delay: 60.0,
        }
    }
}

impl RetryPolicy {
    /// Extract the retry policy from a step's spec, falling back to defaults.
    pub fn from_step(step: &Step) -> (Self, Option<String>, Option<String>) {
        match step.spec.as_ref() {
            Some(spec) => (Self::from_spec(spec), spec.stop_when.clone(), spec.retry_when.clone()),
            None => (Self::default(), None, None),
        }
    }

    fn from_spec(spec: &StepSpec) -> Self {
        let defaults = Self::default();
        Self {
            max_attempts: spec.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            initial_delay: spec.retry_delay.unwrap_or(defaults.initial_delay).max(0.0),
            backoff_multiplier: spec
                .retry_backoff
                .unwrap_or(defaults.backoff_multiplier)
                .max(0.0),
            max_delay: defaults.max_delay,
        }
    }

    /// `min(max_delay, initial_delay * multiplier^(attempts-1))`, zero when
    /// `initial_delay` is zero. `attempts` is the attempt number that just
    /// failed (1-indexed).
    pub fn backoff_delay(&self, attempts: i32) -> Duration {
        if self.initial_delay <= 0.0 {
            return Duration::ZERO;
        }
        let exponent = (attempts.max(1) - 1) as i32;
        let raw = self.initial_delay * self.backoff_multiplier.max(1.0).powi(exponent);
        let capped = raw.min(self.max_delay).max(0.0);
        Duration::from_secs_f64(capped)
    }
}

/// Outcome of evaluating a completed attempt against its retry policy.
#[derive(Debug, Clone)]
pub enum RetryDecision {
    /// Terminal success; proceed to `step_completed`.
    CompleteSuccess,
    /// Retry the command after `delay`. `next_attempt` is 1-indexed.
    Retry { delay: Duration, next_attempt: i32 },
    /// Terminal failure; retries exhausted or not permitted.
    CompleteFailure,
}

/// Evaluate the retry policy for one attempt.
///
/// `attempt` is the attempt number that just ran (1-indexed). `is_error` is
/// true when the command reported `action_error`/an error outcome.
/// Evaluation order: `stop_when` first (always wins and completes
/// successfully), then retry eligibility, else terminal completion.
pub fn evaluate(
    evaluator: &ConditionEvaluator,
    policy: &RetryPolicy,
    stop_when: Option<&str>,
    retry_when: Option<&str>,
    attempt: i32,
    is_error: bool,
    context: &HashMap<String, serde_json::Value>,
) -> AppResult<RetryDecision> {
    if let Some(expr) = stop_when {
        if evaluator.evaluate_condition(expr, context)? {
            return Ok(RetryDecision::CompleteSuccess);
        }
    }

    let retry_when_matches = match retry_when {
        Some(expr) => evaluator.evaluate_condition(expr, context)?,
        None => false,
    };

    let wants_retry = is_error || retry_when_matches;

    if wants_retry && attempt < policy.max_attempts {
        let next_attempt = attempt + 1;
        return Ok(RetryDecision::Retry {
            delay: policy.backoff_delay(attempt),
            next_attempt,
        });
    }

    if is_error {
        Ok(RetryDecision::CompleteFailure)
    } else {
        Ok(RetryDecision::CompleteSuccess)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: 1.0,
            backoff_multiplier: 2.0,
            max_delay: 10.0,
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_secs_f64(1.0));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs_f64(2.0));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs_f64(4.0));
        assert_eq!(policy.backoff_delay(5), Duration::from_secs_f64(10.0));
    }

    #[test]
    fn zero_initial_delay_is_zero_backoff() {
        let policy = RetryPolicy {
            initial_delay: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.backoff_delay(4), Duration::ZERO);
    }

    #[test]
    fn retries_until_exhausted_then_completes_with_failure() {
        let evaluator = ConditionEvaluator::new();
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: 0.1,
            backoff_multiplier: 2.0,
            max_delay: 10.0,
        };
        let mut ctx = HashMap::new();
        ctx.insert("status_code".to_string(), serde_json::json!(503));

        for attempt in 1..3 {
            match evaluate(
                &evaluator,
                &policy,
                None,
                Some("status_code >= 500"),
                attempt,
                true,
                &ctx,
            )
            .unwrap()
            {
                RetryDecision::Retry { next_attempt, .. } => {
                    assert_eq!(next_attempt, attempt + 1)
                }
                other => panic!("expected retry at attempt {}, got {:?}", attempt, other),
            }
        }

        match evaluate(
            &evaluator,
            &policy,
            None,
            Some("status_code >= 500"),
            3,
            true,
            &ctx,
        )
        .unwrap()
        {
            RetryDecision::CompleteFailure => {}
            other => panic!("expected terminal failure, got {:?}", other),
        }
    }

    #[test]
    fn stop_when_short_circuits_to_success() {
        let evaluator = ConditionEvaluator::new();
        let policy = RetryPolicy::default();
        let mut ctx = HashMap::new();
        ctx.insert("status_code".to_string(), serde_json::json!(200));

        match evaluate(&evaluator, &policy, Some("status_code == 200"), None, 1, false, &ctx)
            .unwrap()
        {
            RetryDecision::CompleteSuccess => {}
            other => panic!("expected success, got {:?}", other),
        }
    }
}
