//! Error types for solver operations.

use ef_core::CoreError;
use thiserror::Error;

/// Errors that can occur during a nonlinear solve.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("Convergence failed after {iterations} iterations: {what}")]
    ConvergenceFailed { what: String, iterations: usize },

    #[error("Iteration diverged at iteration {iteration}: {what}")]
    Diverged { what: String, iteration: usize },

    #[error("Singular Jacobian: {what}")]
    SingularJacobian { what: String },

    #[error("Invalid configuration: {what}")]
    InvalidConfig { what: String },

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] CoreError),
}

impl SolverError {
    /// Whether a smaller step (or a different iteration) may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SolverError::InvalidConfig { .. })
    }
}

pub type SolverResult<T> = Result<T, SolverError>;
