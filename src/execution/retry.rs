//! Retry executor
//!
//! Runs one action invocation under its step's retry policy: attempt, decide
//! whether the failure is retryable, wait out the backoff delay, try again.

use crate::{
    action::{ActionError, ActionExecutor, ActionRequest},
    core::{
        step::{Backoff, RetryCondition, RetryPolicy, Step},
        value::{status_code, Value},
    },
};
use rand::Rng;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

static STATUS_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([1-5]\d\d)\b").expect("status regex is valid"));

const TIMEOUT_MARKERS: [&str; 3] = ["timeout", "timed out", "deadline exceeded"];
const CONNECTION_MARKERS: [&str; 5] = [
    "connection",
    "connect error",
    "refused",
    "reset by peer",
    "broken pipe",
];

/// Emitted before each retry delay
#[derive(Debug, Clone)]
pub struct RetryNotice {
    /// The attempt about to be made (2 for the first retry)
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay: Duration,
    pub reason: String,
}

/// What the final attempt produced
#[derive(Debug, Clone)]
pub struct RetryOutcome {
    pub output: Value,
    /// Raw error of the final attempt
    pub error: Option<String>,
    pub attempts: u32,
    /// Set when the final response carried a retryable status code
    pub retryable_status: Option<u16>,
}

impl RetryOutcome {
    fn success(output: Value, attempts: u32) -> Self {
        Self {
            output,
            error: None,
            attempts,
            retryable_status: None,
        }
    }

    fn failure(error: String, attempts: u32) -> Self {
        Self {
            output: Value::Null,
            error: Some(error),
            attempts,
            retryable_status: None,
        }
    }

    /// Failure message for the step result, mentioning the attempt count
    /// once more than one attempt was made
    pub fn failure_message(&self) -> Option<String> {
        match (&self.error, self.retryable_status) {
            (Some(error), _) if self.attempts > 1 => Some(format!(
                "retry attempts exhausted after {} attempts: {}",
                self.attempts, error
            )),
            (Some(error), _) => Some(error.clone()),
            (None, Some(code)) => Some(format!(
                "retry attempts exhausted after {} attempts: status code {}",
                self.attempts, code
            )),
            (None, None) => None,
        }
    }
}

/// Execute `request` for `step`, honoring its retry policy and per-attempt timeout
pub async fn execute_with_retry<A, F>(
    step: &Step,
    request: &ActionRequest,
    actions: &A,
    cancel: &CancellationToken,
    on_retry: F,
) -> RetryOutcome
where
    A: ActionExecutor + ?Sized,
    F: Fn(RetryNotice) + Send + Sync,
{
    let Some(policy) = &step.retry else {
        return match attempt(actions, cancel, request, step.timeout).await {
            Ok(output) => RetryOutcome::success(output, 1),
            Err(e) => RetryOutcome::failure(e.to_string(), 1),
        };
    };

    let mut attempt_number = 1;
    loop {
        let result = attempt(actions, cancel, request, step.timeout).await;

        let (outcome, reason) = match result {
            Ok(output) => {
                let code = status_code(&output).filter(|c| status_is_retryable(policy, *c));
                let reason = code.map(|c| format!("status code {}", c));
                let outcome = RetryOutcome {
                    retryable_status: code,
                    ..RetryOutcome::success(output, attempt_number)
                };
                (outcome, reason)
            }
            Err(ActionError::Cancelled) => {
                return RetryOutcome::failure(ActionError::Cancelled.to_string(), attempt_number);
            }
            Err(error) => {
                let message = error.to_string();
                let retryable = error_is_retryable(policy, &error, &message);
                (
                    RetryOutcome::failure(message.clone(), attempt_number),
                    retryable.then_some(message),
                )
            }
        };

        let Some(reason) = reason else {
            return outcome;
        };

        // `reason` may carry secret values; only the caller can mask it
        if attempt_number >= policy.attempts {
            debug!("Step '{}' exhausted {} attempt(s)", step.name, policy.attempts);
            return outcome;
        }

        let delay = compute_delay(policy, attempt_number);
        debug!(
            "Step '{}' attempt {}/{} failed, retrying in {:?}",
            step.name, attempt_number, policy.attempts, delay
        );
        on_retry(RetryNotice {
            attempt: attempt_number + 1,
            max_attempts: policy.attempts,
            delay,
            reason,
        });

        tokio::select! {
            _ = cancel.cancelled() => {
                return RetryOutcome::failure(ActionError::Cancelled.to_string(), attempt_number);
            }
            _ = tokio::time::sleep(delay) => {}
        }
        attempt_number += 1;
    }
}

async fn attempt<A: ActionExecutor + ?Sized>(
    actions: &A,
    cancel: &CancellationToken,
    request: &ActionRequest,
    timeout: Option<Duration>,
) -> Result<Value, ActionError> {
    let call = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, actions.execute(cancel, request))
                .await
                .map_err(|_| ActionError::Timeout(limit))?,
            None => actions.execute(cancel, request).await,
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(ActionError::Cancelled),
        result = call => result,
    }
}

/// Delay before the retry following `attempt` (1-based), before jitter
pub fn base_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let raw = match policy.backoff {
        Backoff::Fixed => policy.delay,
        Backoff::Linear => policy.delay.saturating_mul(attempt),
        Backoff::Exponential => policy
            .delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1))),
    };
    match policy.max_delay {
        Some(max) => raw.min(max),
        None => raw,
    }
}

/// Delay before the retry following `attempt`, with ±10% jitter if enabled
pub fn compute_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let delay = base_delay(policy, attempt);
    if policy.jitter && !delay.is_zero() {
        let factor: f64 = rand::rng().random_range(0.9..=1.1);
        delay.mul_f64(factor)
    } else {
        delay
    }
}

/// Whether an action error qualifies for another attempt
pub fn error_is_retryable(policy: &RetryPolicy, error: &ActionError, message: &str) -> bool {
    if policy.conditions.is_empty() {
        return true;
    }

    let lower = message.to_ascii_lowercase();
    policy.conditions.iter().any(|condition| match condition {
        RetryCondition::Timeout => {
            matches!(error, ActionError::Timeout(_))
                || TIMEOUT_MARKERS.iter().any(|m| lower.contains(m))
        }
        RetryCondition::Connection => {
            matches!(error, ActionError::Connection(_))
                || CONNECTION_MARKERS.iter().any(|m| lower.contains(m))
        }
        RetryCondition::StatusClass(class) => STATUS_CODE_RE
            .captures_iter(&lower)
            .filter_map(|c| c[1].parse::<u16>().ok())
            .any(|code| code / 100 == *class),
        RetryCondition::StatusCode(code) => STATUS_CODE_RE
            .captures_iter(&lower)
            .any(|c| c[1].parse::<u16>().ok() == Some(*code)),
        RetryCondition::ErrorContains(text) => lower.contains(&text.to_ascii_lowercase()),
    })
}

/// Whether a successful response's status code qualifies for another attempt.
/// Only explicit status conditions trigger this.
pub fn status_is_retryable(policy: &RetryPolicy, code: u16) -> bool {
    policy.conditions.iter().any(|condition| match condition {
        RetryCondition::StatusClass(class) => code / 100 == *class,
        RetryCondition::StatusCode(expected) => code == *expected,
        _ => false,
    })
}
