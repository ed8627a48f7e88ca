//! ---
//! psoak_section: "06-orchestration"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Workload phases, worker pool, and operation selection."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
//! Generates concurrent and sequential workloads against a placement
//! controller and interleaves invariant checks between phases.
//!
//! Any failure aborts the scenario; there is no partial recovery.

pub mod chooser;
pub mod orchestrator;
pub mod pool;
pub mod report;

pub use chooser::{MixedOperation, OperationChooser, OperationKind};
pub use orchestrator::{
    WorkloadOrchestrator, PHASE_BASELINE, PHASE_BULK_CREATE, PHASE_CONTROLLER_RESTART,
    PHASE_IDLE_RECONCILE, PHASE_MIXED_OPERATIONS, PHASE_NODE_LIFECYCLE, PHASE_POST_CHECK,
    PHASE_WRAP_UP,
};
pub use pool::WorkerPool;
pub use report::{NodeCycleReport, PhaseTiming, ScenarioReport};
