//! ---
//! psoak_section: "01-core-functionality"
//! psoak_subsection: "module"
//! psoak_type: "source"
//! psoak_scope: "code"
//! psoak_description: "Shared configuration and tracing primitives."
//! psoak_version: "v0.0.0-prealpha"
//! psoak_owner: "tbd"
//! ---
//! Configuration loading and tracing setup consumed across the workspace.

pub mod config;
pub mod logging;

pub use config::{
    AttemptBudget, ChecksConfig, ControllerConfig, HarnessConfig, LifecycleConfig,
    LoadedHarnessConfig, LoggingConfig, ScenarioConfig,
};
pub use logging::{init_tracing, run_log_file_name, LogFormat};
