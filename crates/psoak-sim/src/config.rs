//! ---
//! psoak_section: "08-simulation"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Simulation parameters and fault plan."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shape and timing of the simulated cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Node count; nodes are numbered from 1.
    pub nodes: u64,
    /// Status polls a node spends in `Draining` or `Filling` before settling.
    pub transition_polls: usize,
    /// Resident memory reported with no shards.
    pub base_memory_bytes: f64,
    pub memory_per_shard_bytes: f64,
    /// Report `process_resident_memory_bytes` at all.
    pub report_memory: bool,
    /// Create one unsharded resource before the scenario starts.
    pub seed_unsharded_resource: bool,
    /// Delay added to every controller call.
    pub call_latency: Duration,
    /// Time `wait_until_ready` takes after a start.
    pub readiness_delay: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            nodes: 5,
            transition_polls: 2,
            base_memory_bytes: 64.0 * 1024.0 * 1024.0,
            memory_per_shard_bytes: 16.0 * 1024.0,
            report_memory: true,
            seed_unsharded_resource: true,
            call_latency: Duration::ZERO,
            readiness_delay: Duration::from_millis(10),
        }
    }
}

impl SimulationConfig {
    pub fn with_nodes(mut self, nodes: u64) -> Self {
        self.nodes = nodes;
        self
    }

    pub fn with_transition_polls(mut self, polls: usize) -> Self {
        self.transition_polls = polls;
        self
    }

    pub fn with_call_latency(mut self, latency: Duration) -> Self {
        self.call_latency = latency;
        self
    }

    pub fn with_readiness_delay(mut self, delay: Duration) -> Self {
        self.readiness_delay = delay;
        self
    }

    pub fn with_memory(mut self, base_bytes: f64, per_shard_bytes: f64) -> Self {
        self.base_memory_bytes = base_bytes;
        self.memory_per_shard_bytes = per_shard_bytes;
        self
    }

    pub fn without_memory_metric(mut self) -> Self {
        self.report_memory = false;
        self
    }

    pub fn without_seed_resource(mut self) -> Self {
        self.seed_unsharded_resource = false;
        self
    }
}

/// Failures injected into the simulated controller.
///
/// Counters are consumed one per call: `drain_failures = 2` fails the next two
/// drain requests with a transient remote error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultPlan {
    pub drain_failures: usize,
    pub fill_failures: usize,
    pub status_failures: usize,
    pub create_failures: usize,
    /// Report the first shard as attached on a second node.
    pub double_attachment: bool,
    /// Fail the controller's own consistency check.
    pub inconsistent: bool,
    /// Keep a drained node in `Draining` forever.
    pub stuck_draining: bool,
    /// Reconciles left pending by every controller start.
    pub reconciles_after_restart: usize,
    /// Reconciles queued once `reconcile_all` first reports idle.
    pub reconciles_after_idle: usize,
}
