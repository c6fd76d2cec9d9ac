//! Error types for integration.

use ef_core::CoreError;
use ef_solver::SolverError;
use thiserror::Error;

/// Errors returned by the integrators.
///
/// Configuration problems are returned before any stepping. Numerical
/// failures during stepping are recorded on the solution bundle status and
/// only become a `SimError` through `SolutionBundle::into_result`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimError {
    #[error("Invalid configuration: {what}")]
    InvalidConfig { what: String },

    #[error("Step failed at t={t}: {reason}")]
    StepFailed { t: f64, reason: String },

    #[error("Step size {h:e} fell below the minimum at t={t}")]
    StepTooSmall { t: f64, h: f64 },

    #[error("Integration terminated by event {index} at t={t}")]
    EventTerminated { index: usize, t: f64 },

    #[error("Nonlinear solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("System error: {0}")]
    System(#[from] CoreError),
}

impl SimError {
    pub(crate) fn config(what: impl Into<String>) -> Self {
        SimError::InvalidConfig { what: what.into() }
    }
}

pub type SimResult<T> = Result<T, SimError>;
