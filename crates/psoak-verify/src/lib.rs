//! ---
//! psoak_section: "05-verification"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Placement snapshots and consistency checks."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
//! Observes the controller's placement state and asserts properties of it.
//! Nothing in this crate repairs state; every check either passes or raises
//! `HarnessError::ConsistencyViolation`.

pub mod checker;
pub mod load;
pub mod snapshot;

pub use checker::{BalanceExpectation, CheckPolicy, ConsistencyChecker, DoubleAttachment};
pub use load::NodeLoadTable;
pub use snapshot::{Intent, Observed, PlacementRecord, PlacementSnapshot, SnapshotCollector};
