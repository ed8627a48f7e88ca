//! ---
//! psoak_section: "03-observability"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Structured logging context and phase events."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Logging helpers shared by the harness crates.

use std::time::Duration;

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for tests and tools.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_test_writer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Scenario phase emitting the event.
    pub phase: Option<&'a str>,
    /// Storage node the event concerns.
    pub node: Option<u64>,
    /// Resource or shard identifier the event concerns.
    pub resource: Option<&'a str>,
    /// Attempt number inside a retry or poll loop.
    pub attempt: Option<usize>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a phase name.
    pub fn with_phase(mut self, phase: &'a str) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Attach a node identifier.
    pub fn with_node(mut self, node: u64) -> Self {
        self.node = Some(node);
        self
    }

    /// Attach a resource identifier.
    pub fn with_resource(mut self, resource: &'a str) -> Self {
        self.resource = Some(resource);
        self
    }

    /// Attach an attempt number.
    pub fn with_attempt(mut self, attempt: usize) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Outcome of a scenario phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The phase and its checks passed.
    Success,
    /// The phase aborted the scenario.
    Fault,
}

impl PhaseOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            PhaseOutcome::Success => "success",
            PhaseOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized phase completion event.
pub fn log_phase_event(
    context: Option<&LogContext>,
    phase: &str,
    elapsed: Duration,
    message: &str,
    outcome: PhaseOutcome,
) {
    let ctx = context.cloned().unwrap_or_default();
    let seconds = elapsed.as_secs_f64();
    let node = ctx.node.unwrap_or_default();
    match outcome {
        PhaseOutcome::Success => tracing::info!(
            phase,
            outcome = outcome.as_str(),
            seconds,
            node,
            resource = ctx.resource.unwrap_or(""),
            "{message}"
        ),
        PhaseOutcome::Fault => tracing::error!(
            phase,
            outcome = outcome.as_str(),
            seconds,
            node,
            resource = ctx.resource.unwrap_or(""),
            "{message}"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new().with_phase("drain").with_node(3);
        psoak_info!(context = ctx.clone(), "node drained");
        psoak_debug!("debug message");
        psoak_warn!(context = ctx.with_attempt(2), "retrying in {}s", 2);
    }

    #[test]
    fn phase_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_phase("bulk_create");
        log_phase_event(
            Some(&ctx),
            "bulk_create",
            Duration::from_millis(5),
            "created resources",
            PhaseOutcome::Success,
        );
        log_phase_event(
            None,
            "restart",
            Duration::ZERO,
            "controller failed readiness",
            PhaseOutcome::Fault,
        );
    }
}
