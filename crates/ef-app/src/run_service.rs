//! Run execution service.

use std::path::Path;
use std::time::Instant;

use ef_envelope::envelope_full;
use ef_project::Scenario;
use ef_sim::{SolutionBundle, Status, integrate};
use tracing::{info, warn};

use crate::compile::{self, CompiledScenario, RunPlan};
use crate::error::AppResult;
use crate::project_service;

/// Which kind of solve produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Direct,
    Envelope,
}

/// Wall-clock timing of a run.
#[derive(Debug, Clone, Default)]
pub struct RunTimingSummary {
    pub compile_time_s: f64,
    pub solve_time_s: f64,
    pub total_time_s: f64,
}

/// Response from a run execution.
#[derive(Debug, Clone)]
pub struct RunResponse {
    pub name: String,
    pub kind: RunKind,
    pub bundle: SolutionBundle,
    pub timing: RunTimingSummary,
}

impl RunResponse {
    pub fn is_success(&self) -> bool {
        self.bundle.is_success()
    }

    /// Why the solve stopped before the end of the span, if it did.
    pub fn failure_reason(&self) -> Option<String> {
        match &self.bundle.status {
            Status::Success => None,
            Status::StepFailure { t, reason } => Some(format!("t={t}: {reason}")),
            Status::EventTerminated { index, t } => Some(format!("event {index} at t={t}")),
        }
    }
}

/// Load, compile and run a scenario file.
pub fn run_file(path: &Path) -> AppResult<RunResponse> {
    let scenario = project_service::load_scenario(path)?;
    run_scenario(&scenario)
}

/// Compile and run a scenario.
///
/// A solve that stops early is still a response; its bundle carries the
/// failure status and the accepted part of the trajectory.
pub fn run_scenario(scenario: &Scenario) -> AppResult<RunResponse> {
    let started = Instant::now();
    let compiled = compile::compile_scenario(scenario)?;
    let compile_time_s = started.elapsed().as_secs_f64();

    let solve_started = Instant::now();
    let bundle = run_compiled(&compiled)?;
    let solve_time_s = solve_started.elapsed().as_secs_f64();

    let kind = match compiled.plan {
        RunPlan::Direct(_) => RunKind::Direct,
        RunPlan::Envelope(_) => RunKind::Envelope,
    };
    let timing = RunTimingSummary {
        compile_time_s,
        solve_time_s,
        total_time_s: started.elapsed().as_secs_f64(),
    };

    match &bundle.status {
        Status::Success => info!(
            scenario = %compiled.name,
            ?kind,
            steps = bundle.stats.steps,
            rejected = bundle.stats.rejected_steps,
            rhs_evals = bundle.stats.rhs_evals,
            period_evaluations = bundle.stats.period_evaluations,
            solve_time_s,
            "run completed"
        ),
        Status::StepFailure { t, reason } => warn!(
            scenario = %compiled.name,
            ?kind,
            t,
            %reason,
            "run stopped early"
        ),
        Status::EventTerminated { index, t } => info!(
            scenario = %compiled.name,
            ?kind,
            index,
            t,
            "run terminated by event"
        ),
    }

    Ok(RunResponse {
        name: compiled.name,
        kind,
        bundle,
        timing,
    })
}

/// Execute an already compiled scenario.
pub fn run_compiled(compiled: &CompiledScenario) -> AppResult<SolutionBundle> {
    let system = compiled.system.as_ref();
    let bundle = match &compiled.plan {
        RunPlan::Direct(opts) => integrate(system, compiled.span, &compiled.y0, opts)?,
        RunPlan::Envelope(opts) => envelope_full(system, compiled.span, &compiled.y0, opts)?,
    };
    Ok(bundle)
}
