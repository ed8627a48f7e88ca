//! ---
//! psoak_section: "04-resilience"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Polling a remote status until it reaches a target value."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use psoak_api::{HarnessError, HarnessResult};
use psoak_common::AttemptBudget;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::metrics::{AttemptOutcome, ResilienceMetrics};

/// Attempt budget for waiting on a remote condition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    max_attempts: usize,
    backoff: Duration,
}

impl PollPolicy {
    pub fn new(max_attempts: usize, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }
}

impl From<AttemptBudget> for PollPolicy {
    fn from(budget: AttemptBudget) -> Self {
        Self::new(budget.max_attempts, budget.backoff)
    }
}

/// Repeatedly fetches a value until it equals the desired one.
///
/// A fetch that fails with a remote error consumes an attempt exactly like a
/// mismatch does. Exhaustion distinguishes the two cases: a controller that
/// kept failing surfaces its last `RemoteOperation`, while a controller that
/// answered but never reached the target surfaces `ConditionNotReached`.
#[derive(Debug, Clone)]
pub struct ConditionPoller {
    policy: PollPolicy,
    metrics: Option<ResilienceMetrics>,
}

enum LastAttempt {
    Observed(String),
    Failed(HarnessError),
}

impl ConditionPoller {
    pub fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: ResilienceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Poll `fetch(target)` until it yields `desired`.
    ///
    /// `condition` names what is being waited on (for example
    /// `"scheduling policy"`); it labels metrics and the failure subject.
    pub async fn poll_until<K, S, F, Fut>(
        &self,
        condition: &str,
        target: K,
        desired: &S,
        mut fetch: F,
    ) -> HarnessResult<()>
    where
        K: Copy + Display,
        S: PartialEq + Display,
        F: FnMut(K) -> Fut,
        Fut: Future<Output = HarnessResult<S>>,
    {
        let mut remaining = self.policy.max_attempts();
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let last = match fetch(target).await {
                Ok(current) if current == *desired => {
                    debug!(
                        condition,
                        target = %target,
                        attempt,
                        desired = %desired,
                        "condition reached",
                    );
                    self.record(condition, AttemptOutcome::Success);
                    return Ok(());
                }
                Ok(current) => {
                    info!(
                        condition,
                        target = %target,
                        attempt,
                        observed = %current,
                        desired = %desired,
                        "condition not yet reached",
                    );
                    LastAttempt::Observed(current.to_string())
                }
                Err(err) if err.is_retryable() => {
                    info!(
                        condition,
                        target = %target,
                        attempt,
                        error = %err,
                        "status fetch failed",
                    );
                    LastAttempt::Failed(err)
                }
                Err(err) => {
                    warn!(
                        condition,
                        target = %target,
                        attempt,
                        kind = err.kind(),
                        error = %err,
                        "status fetch failed with non-retryable error",
                    );
                    self.record(condition, AttemptOutcome::Fatal);
                    return Err(err);
                }
            };

            remaining -= 1;
            if remaining == 0 {
                self.record(condition, AttemptOutcome::Exhausted);
                return Err(match last {
                    LastAttempt::Failed(err) => err,
                    LastAttempt::Observed(observed) => HarnessError::ConditionNotReached {
                        subject: format!("{condition} of {target}"),
                        expected: desired.to_string(),
                        last_observed: Some(observed),
                        attempts: attempt,
                    },
                });
            }
            let outcome = match last {
                LastAttempt::Failed(_) => AttemptOutcome::Retry,
                LastAttempt::Observed(_) => AttemptOutcome::Mismatch,
            };
            self.record(condition, outcome);
            sleep(self.policy.backoff()).await;
        }
    }

    fn record(&self, condition: &str, outcome: AttemptOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.record_poll(condition, outcome);
        }
    }
}
