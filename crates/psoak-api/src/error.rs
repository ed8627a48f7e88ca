//! ---
//! psoak_section: "02-controller-api"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Error kinds raised by harness components."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::time::Duration;

use thiserror::Error;

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

fn observed_or_nothing(observed: &Option<String>) -> &str {
    observed.as_deref().unwrap_or("nothing")
}

/// Failure reported by the controller for a single remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed{}: {message}", status_suffix(.status))]
pub struct RemoteOperationError {
    /// Name of the API operation that failed.
    pub operation: String,
    /// HTTP-style status code, when the controller answered at all.
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteOperationError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// Every failure the harness can surface.
///
/// Only [`HarnessError::RemoteOperation`] is retryable; all other kinds abort
/// the running phase.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HarnessError {
    #[error(transparent)]
    RemoteOperation(#[from] RemoteOperationError),
    #[error(
        "{subject} did not reach {expected} after {attempts} attempts (last observed: {})",
        observed_or_nothing(.last_observed)
    )]
    ConditionNotReached {
        subject: String,
        expected: String,
        last_observed: Option<String>,
        attempts: usize,
    },
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),
    #[error("resource limit exceeded for {resource}: observed {observed}, limit {limit}")]
    ResourceLimitExceeded {
        resource: String,
        observed: f64,
        limit: f64,
    },
    #[error("{operation} took {elapsed:?}, bound is {bound:?}")]
    LatencyBoundExceeded {
        operation: String,
        elapsed: Duration,
        bound: Duration,
    },
    #[error("{operation} returned a malformed response: {message}")]
    MalformedResponse { operation: String, message: String },
    #[error("metric {0} was not reported by the controller")]
    MetricUnavailable(String),
    #[error("invalid scenario: {0}")]
    InvalidScenario(String),
    #[error("lifecycle action {action} failed: {message}")]
    Lifecycle { action: String, message: String },
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl HarnessError {
    /// Whether retry and poll loops may absorb this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RemoteOperation(_))
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        Self::ConsistencyViolation(message.into())
    }

    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RemoteOperation(RemoteOperationError::new(operation, message))
    }

    /// Short, stable label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RemoteOperation(_) => "remote_operation",
            Self::ConditionNotReached { .. } => "condition_not_reached",
            Self::ConsistencyViolation(_) => "consistency_violation",
            Self::ResourceLimitExceeded { .. } => "resource_limit_exceeded",
            Self::LatencyBoundExceeded { .. } => "latency_bound_exceeded",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::MetricUnavailable(_) => "metric_unavailable",
            Self::InvalidScenario(_) => "invalid_scenario",
            Self::Lifecycle { .. } => "lifecycle",
            Self::Worker(_) => "worker",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_remote_failures_are_retryable() {
        assert!(HarnessError::remote("drain_node", "503").is_retryable());
        assert!(!HarnessError::consistency("mismatch").is_retryable());
        assert!(!HarnessError::MetricUnavailable("rss".into()).is_retryable());
        let malformed = HarnessError::MalformedResponse {
            operation: "list_nodes".into(),
            message: "expected a sequence".into(),
        };
        assert!(!malformed.is_retryable());
        assert_eq!(malformed.kind(), "malformed_response");
    }

    #[test]
    fn messages_name_the_offending_values() {
        let err = RemoteOperationError::new("fill_node", "busy").with_status(409);
        assert_eq!(err.to_string(), "fill_node failed (status 409): busy");

        let err = HarnessError::ConditionNotReached {
            subject: "node 3 scheduling policy".into(),
            expected: "Active".into(),
            last_observed: Some("Filling".into()),
            attempts: 24,
        };
        assert_eq!(
            err.to_string(),
            "node 3 scheduling policy did not reach Active after 24 attempts (last observed: Filling)"
        );
    }
}
