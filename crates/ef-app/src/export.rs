//! CSV and JSON export of run results.

use std::path::Path;
use std::str::FromStr;

use ef_core::{Real, State};
use ef_sim::{EnvelopeTrace, SolutionBundle, SolveStats, Status, Trajectory};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::run_service::{RunKind, RunResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(AppError::InvalidInput(format!(
                "unknown export format '{other}' (expected csv or json)"
            ))),
        }
    }
}

/// `t,y0,y1,...` rows of a trajectory.
pub fn trajectory_csv(trajectory: &Trajectory) -> String {
    samples_csv(&trajectory.t, &trajectory.y, "y")
}

/// `t,z0,z1,...` rows of the macro samples of an envelope solve.
pub fn envelope_csv(trace: &EnvelopeTrace) -> String {
    samples_csv(&trace.t, &trace.z, "z")
}

fn samples_csv(t: &[Real], y: &[State], prefix: &str) -> String {
    let dim = y.first().map_or(0, |s| s.len());
    let mut csv = String::from("t");
    for i in 0..dim {
        csv.push_str(&format!(",{prefix}{i}"));
    }
    csv.push('\n');
    for (ti, yi) in t.iter().zip(y) {
        csv.push_str(&ti.to_string());
        for v in yi.iter() {
            csv.push(',');
            csv.push_str(&v.to_string());
        }
        csv.push('\n');
    }
    csv
}

#[derive(Serialize)]
struct SamplesExport {
    t: Vec<Real>,
    y: Vec<Vec<Real>>,
}

impl SamplesExport {
    fn new(t: &[Real], y: &[State]) -> Self {
        Self {
            t: t.to_vec(),
            y: y.iter().map(|s| s.iter().copied().collect()).collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum StatusExport {
    Success,
    StepFailure { t: Real, reason: String },
    EventTerminated { index: usize, t: Real },
}

impl From<&Status> for StatusExport {
    fn from(status: &Status) -> Self {
        match status {
            Status::Success => StatusExport::Success,
            Status::StepFailure { t, reason } => StatusExport::StepFailure {
                t: *t,
                reason: reason.clone(),
            },
            Status::EventTerminated { index, t } => StatusExport::EventTerminated {
                index: *index,
                t: *t,
            },
        }
    }
}

#[derive(Serialize)]
struct StatsExport {
    steps: usize,
    rejected_steps: usize,
    rhs_evals: usize,
    jacobian_evals: usize,
    fd_jacobians: usize,
    lu_decompositions: usize,
    nonlinear_failures: usize,
    slow_steps: usize,
    max_nonlinear_iterations: usize,
    period_evaluations: usize,
    period_estimates: usize,
    t_final: Real,
}

impl From<&SolveStats> for StatsExport {
    fn from(s: &SolveStats) -> Self {
        Self {
            steps: s.steps,
            rejected_steps: s.rejected_steps,
            rhs_evals: s.rhs_evals,
            jacobian_evals: s.jacobian_evals,
            fd_jacobians: s.fd_jacobians,
            lu_decompositions: s.lu_decompositions,
            nonlinear_failures: s.nonlinear_failures,
            slow_steps: s.slow_steps,
            max_nonlinear_iterations: s.max_nonlinear_iterations,
            period_evaluations: s.period_evaluations,
            period_estimates: s.period_estimates,
            t_final: s.t_final,
        }
    }
}

#[derive(Serialize)]
struct EventExport {
    index: usize,
    t: Real,
    y: Vec<Real>,
    direction: String,
}

#[derive(Serialize)]
struct EnvelopeExport {
    period: Real,
    /// Period at each macro sample
    #[serde(skip_serializing_if = "Vec::is_empty")]
    periods: Vec<Real>,
    fallback_steps: usize,
    samples: SamplesExport,
    windows: Vec<SamplesExport>,
}

#[derive(Serialize)]
struct RunExport {
    name: String,
    kind: &'static str,
    #[serde(flatten)]
    status: StatusExport,
    stats: StatsExport,
    trajectory: SamplesExport,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    events: Vec<EventExport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    envelope: Option<EnvelopeExport>,
}

fn run_export(name: &str, kind: RunKind, bundle: &SolutionBundle) -> RunExport {
    RunExport {
        name: name.to_string(),
        kind: match kind {
            RunKind::Direct => "direct",
            RunKind::Envelope => "envelope",
        },
        status: StatusExport::from(&bundle.status),
        stats: StatsExport::from(&bundle.stats),
        trajectory: SamplesExport::new(bundle.t(), bundle.y()),
        events: bundle
            .events
            .iter()
            .map(|e| EventExport {
                index: e.index,
                t: e.t,
                y: e.y.iter().copied().collect(),
                direction: format!("{:?}", e.direction).to_lowercase(),
            })
            .collect(),
        envelope: bundle.envelope.as_ref().map(|trace| EnvelopeExport {
            period: trace.period,
            periods: trace.periods.clone(),
            fallback_steps: trace.fallback_steps,
            samples: SamplesExport::new(&trace.t, &trace.z),
            windows: trace
                .fine
                .iter()
                .map(|w| SamplesExport::new(&w.t, &w.y))
                .collect(),
        }),
    }
}

/// Pretty-printed JSON document of a run.
pub fn to_json(response: &RunResponse) -> AppResult<String> {
    let export = run_export(&response.name, response.kind, &response.bundle);
    Ok(serde_json::to_string_pretty(&export)?)
}

/// Render a run in the requested format.
///
/// CSV holds the trajectory; for envelope runs it is the macro samples.
pub fn render(response: &RunResponse, format: ExportFormat) -> AppResult<String> {
    match format {
        ExportFormat::Csv => Ok(trajectory_csv(&response.bundle.trajectory)),
        ExportFormat::Json => to_json(response),
    }
}

pub fn write_output(path: &Path, contents: &str) -> AppResult<()> {
    std::fs::write(path, contents).map_err(|source| AppError::OutputWrite {
        path: path.to_path_buf(),
        source,
    })
}
