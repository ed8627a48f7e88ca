//! ---
//! psoak_section: "07-controller-client"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Controller client exports."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
//! Adapters that point the harness at a live controller deployment.

pub mod audit;
pub mod http;
pub mod lifecycle;

pub use audit::{AuditReport, LogAudit, LogFinding};
pub use http::HttpController;
pub use lifecycle::{node_command, CommandLifecycle, NODE_ID_PLACEHOLDER};
