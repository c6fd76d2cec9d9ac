//! Shared application service layer for envelope-follow.
//!
//! This crate sits between the scenario files and the CLI: it loads and
//! validates scenarios, compiles them into a payload system and solver
//! options, runs them and exports the results.

pub mod compile;
pub mod error;
pub mod export;
pub mod project_service;
pub mod run_service;

// Re-export key types for convenience
pub use compile::{CompiledScenario, RunPlan, compile_scenario, compile_system};
pub use error::{AppError, AppResult};
pub use export::{ExportFormat, envelope_csv, render, to_json, trajectory_csv, write_output};
pub use project_service::{
    ScenarioSummary, load_scenario, save_scenario, summarize, validate_scenario,
};
pub use run_service::{RunKind, RunResponse, RunTimingSummary, run_compiled, run_file, run_scenario};
