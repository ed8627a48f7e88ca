//! ---
//! psoak_section: "02-controller-api"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Controller API boundary shared by every harness crate."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
//! Types and traits describing the placement controller as the harness sees
//! it: an opaque service reached through a query/command API.

pub mod controller;
pub mod error;
pub mod ids;
pub mod node;
pub mod placement;

pub use controller::{ClusterLifecycle, PlacementController};
pub use error::{HarnessError, HarnessResult, RemoteOperationError};
pub use ids::{IdParseError, NodeId, ResourceId, ShardId, SubResourceId};
pub use node::{NodeDescription, NodeSchedulingPolicy};
pub use placement::{
    CreateResourceRequest, CreateSubResourceRequest, IntentState, LocationConf, LocationMode,
    MigrateRequest, ObservedLocation, ObservedState, PlacementEntry, PlacementPolicy,
    ShardParameters,
};

/// Name of the resident-memory metric exported by the controller process.
pub const RESIDENT_MEMORY_METRIC: &str = "process_resident_memory_bytes";
