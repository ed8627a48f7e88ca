//! ---
//! psoak_section: "04-resilience"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Bounded retry and condition polling."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use anyhow::Result;
use prometheus::{IntCounterVec, Opts};
use psoak_metrics::SharedRegistry;

/// Attempt outcome labels shared by retry and poll loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The call succeeded or the desired value was observed.
    Success,
    /// A transient failure; another attempt follows after backoff.
    Retry,
    /// The value did not match yet; another attempt follows after backoff.
    Mismatch,
    /// The attempt budget ran out.
    Exhausted,
    /// A non-retryable failure ended the loop immediately.
    Fatal,
}

impl AttemptOutcome {
    /// Label value used in the metric families.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Retry => "retry",
            AttemptOutcome::Mismatch => "mismatch",
            AttemptOutcome::Exhausted => "exhausted",
            AttemptOutcome::Fatal => "fatal",
        }
    }
}

/// Metrics published by the retry and poll loops.
#[derive(Clone, Debug)]
pub struct ResilienceMetrics {
    registry: SharedRegistry,
    retry_attempts_total: IntCounterVec,
    poll_attempts_total: IntCounterVec,
}

impl ResilienceMetrics {
    /// Register the resilience metric families against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let retry_attempts_total = IntCounterVec::new(
            Opts::new(
                "psoak_retry_attempts_total",
                "Attempts made by the retry executor by operation and outcome",
            ),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        let poll_attempts_total = IntCounterVec::new(
            Opts::new(
                "psoak_poll_attempts_total",
                "Attempts made by the condition poller by condition and outcome",
            ),
            &["condition", "outcome"],
        )?;
        registry.register(Box::new(poll_attempts_total.clone()))?;

        Ok(Self {
            registry,
            retry_attempts_total,
            poll_attempts_total,
        })
    }

    /// Registry the families were registered with.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// Record one retry attempt.
    pub fn record_retry(&self, operation: &str, outcome: AttemptOutcome) {
        self.retry_attempts_total
            .with_label_values(&[operation, outcome.as_str()])
            .inc();
    }

    /// Record one poll attempt.
    pub fn record_poll(&self, condition: &str, outcome: AttemptOutcome) {
        self.poll_attempts_total
            .with_label_values(&[condition, outcome.as_str()])
            .inc();
    }

    /// Current count for a retry label pair; used by tests and reports.
    pub fn retry_count(&self, operation: &str, outcome: AttemptOutcome) -> u64 {
        self.retry_attempts_total
            .with_label_values(&[operation, outcome.as_str()])
            .get()
    }

    /// Current count for a poll label pair; used by tests and reports.
    pub fn poll_count(&self, condition: &str, outcome: AttemptOutcome) -> u64 {
        self.poll_attempts_total
            .with_label_values(&[condition, outcome.as_str()])
            .get()
    }
}
