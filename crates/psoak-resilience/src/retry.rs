//! ---
//! psoak_section: "04-resilience"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Bounded retry of transient remote failures."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use psoak_api::HarnessResult;
use psoak_common::AttemptBudget;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::metrics::{AttemptOutcome, ResilienceMetrics};

/// Attempt budget and fixed backoff for a retried remote call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Duration,
}

impl RetryPolicy {
    /// Construct a policy; at least one attempt is always made.
    pub fn new(max_attempts: usize, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Sleep between a failed attempt and the next one.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(2))
    }
}

impl From<AttemptBudget> for RetryPolicy {
    fn from(budget: AttemptBudget) -> Self {
        Self::new(budget.max_attempts, budget.backoff)
    }
}

/// Retries an operation that may transiently fail against a live controller.
///
/// Only `HarnessError::RemoteOperation` is retried. When the budget is spent
/// the last failure is returned exactly as the operation produced it.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    metrics: Option<ResilienceMetrics>,
}

impl RetryExecutor {
    /// Create an executor with the provided policy.
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            metrics: None,
        }
    }

    /// Attach a metrics handle.
    pub fn with_metrics(mut self, metrics: ResilienceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Policy in effect.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Invoke `op(target)` until it succeeds, fails fatally, or attempts run out.
    pub async fn retry<K, T, F, Fut>(
        &self,
        operation: &str,
        target: K,
        mut op: F,
    ) -> HarnessResult<T>
    where
        K: Copy + Display,
        F: FnMut(K) -> Fut,
        Fut: Future<Output = HarnessResult<T>>,
    {
        let mut remaining = self.policy.max_attempts();
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            match op(target).await {
                Ok(value) => {
                    self.record(operation, AttemptOutcome::Success);
                    return Ok(value);
                }
                Err(err) if err.is_retryable() => {
                    remaining -= 1;
                    info!(
                        operation,
                        target = %target,
                        attempt,
                        remaining,
                        error = %err,
                        "operation failed ({remaining} attempts left)",
                    );
                    if remaining == 0 {
                        self.record(operation, AttemptOutcome::Exhausted);
                        return Err(err);
                    }
                    self.record(operation, AttemptOutcome::Retry);
                    sleep(self.policy.backoff()).await;
                }
                Err(err) => {
                    warn!(
                        operation,
                        target = %target,
                        attempt,
                        kind = err.kind(),
                        error = %err,
                        "operation failed with non-retryable error",
                    );
                    self.record(operation, AttemptOutcome::Fatal);
                    return Err(err);
                }
            }
        }
    }

    fn record(&self, operation: &str, outcome: AttemptOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_retry(operation, outcome);
        }
    }
}
