//! ---
//! psoak_section: "04-resilience"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Bounded retry and condition polling."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
//! Bounded retry and bounded condition polling for remote controller calls.
//!
//! Both loops block the calling task during backoff and absorb only
//! `HarnessError::RemoteOperation`; every other failure kind is returned on
//! the attempt that produced it.

pub mod metrics;
pub mod poll;
pub mod retry;

pub use metrics::{AttemptOutcome, ResilienceMetrics};
pub use poll::{ConditionPoller, PollPolicy};
pub use retry::{RetryExecutor, RetryPolicy};
