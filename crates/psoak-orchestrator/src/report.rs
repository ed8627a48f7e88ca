//! ---
//! psoak_section: "06-orchestration"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Serializable scenario report."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::time::Duration;

use psoak_api::NodeId;
use psoak_verify::NodeLoadTable;
use serde::Serialize;

use crate::chooser::OperationKind;

/// Wall-clock duration of one phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseTiming {
    pub phase: String,
    pub seconds: f64,
}

/// Load observed around one node's drain/restart/fill cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeCycleReport {
    pub node: NodeId,
    pub after_drain: NodeLoadTable,
    pub after_fill: NodeLoadTable,
}

/// Summary of a scenario run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub nodes: Vec<NodeId>,
    pub baseline_shards: usize,
    pub resources_created: usize,
    pub expected_shards: usize,
    pub operations: BTreeMap<OperationKind, usize>,
    pub phases: Vec<PhaseTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_reconcile_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readiness_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resident_memory_bytes: Option<f64>,
    pub node_cycles: Vec<NodeCycleReport>,
}

impl ScenarioReport {
    pub(crate) fn record_phase(&mut self, phase: &str, elapsed: Duration) {
        self.phases.push(PhaseTiming {
            phase: phase.to_owned(),
            seconds: elapsed.as_secs_f64(),
        });
    }

    /// Time recorded for `phase`, summed over repeated entries.
    pub fn phase_seconds(&self, phase: &str) -> Option<f64> {
        let matching: Vec<f64> = self
            .phases
            .iter()
            .filter(|timing| timing.phase == phase)
            .map(|timing| timing.seconds)
            .collect();
        (!matching.is_empty()).then(|| matching.iter().sum())
    }
}
