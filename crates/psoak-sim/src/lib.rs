//! ---
//! psoak_section: "08-simulation"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Simulated controller exports."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
//! In-memory stand-in for a placement controller and its cluster, used to
//! exercise the harness end to end without a live deployment, either in
//! process or behind its HTTP endpoints.

pub mod config;
pub mod controller;
pub mod http;
mod state;

pub use config::{FaultPlan, SimulationConfig};
pub use controller::SimulatedController;
pub use http::{SimulatorHandle, SimulatorServer};
