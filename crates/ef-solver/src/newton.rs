//! Newton solver with a bounded iteration budget.

use crate::error::{SolverError, SolverResult};
use ef_core::{Matrix, State};

/// Newton solver configuration.
#[derive(Clone, Debug)]
pub struct NewtonConfig {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Absolute tolerance for residual norm
    pub abs_tol: f64,
    /// Relative tolerance for residual norm (relative to the initial residual)
    pub rel_tol: f64,
    /// Converge when the update norm drops below `step_tol * (1 + |x|)`
    pub step_tol: f64,
    /// Line search backtracking factor
    pub line_search_beta: f64,
    /// Maximum line search iterations
    pub max_line_search_iters: usize,
}

impl Default for NewtonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            abs_tol: 1e-10,
            rel_tol: 1e-10,
            step_tol: 1e-12,
            line_search_beta: 0.5,
            max_line_search_iters: 20,
        }
    }
}

impl NewtonConfig {
    pub fn validate(&self) -> SolverResult<()> {
        if self.max_iterations == 0 {
            return Err(SolverError::InvalidConfig {
                what: "max_iterations must be positive".to_string(),
            });
        }
        if !(self.line_search_beta > 0.0 && self.line_search_beta < 1.0) {
            return Err(SolverError::InvalidConfig {
                what: format!(
                    "line_search_beta must be in (0, 1), got {}",
                    self.line_search_beta
                ),
            });
        }
        if self.abs_tol < 0.0 || self.rel_tol < 0.0 || self.step_tol < 0.0 {
            return Err(SolverError::InvalidConfig {
                what: "tolerances must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}

/// Newton iteration result.
#[derive(Clone, Debug)]
pub struct NewtonResult {
    /// Solution vector
    pub x: State,
    /// Final residual norm
    pub residual_norm: f64,
    /// Number of iterations
    pub iterations: usize,
    /// Converged flag
    pub converged: bool,
}

/// Newton solver with backtracking line search.
///
/// `jacobian_fn` is called once per iteration; callers that want a
/// simplified Newton iteration return a cached matrix from it.
pub fn newton_solve<F, J>(
    x0: State,
    residual_fn: F,
    jacobian_fn: J,
    config: &NewtonConfig,
) -> SolverResult<NewtonResult>
where
    F: Fn(&State) -> SolverResult<State>,
    J: Fn(&State) -> SolverResult<Matrix>,
{
    let mut x = x0;
    let mut r = residual_fn(&x)?;
    let mut r_norm = r.norm();
    let r0_norm = r_norm;

    if !r_norm.is_finite() {
        return Err(SolverError::Diverged {
            what: "non-finite initial residual".to_string(),
            iteration: 0,
        });
    }

    for iter in 0..config.max_iterations {
        // Check convergence
        if r_norm <= config.abs_tol || r_norm <= config.rel_tol * r0_norm {
            return Ok(NewtonResult {
                x,
                residual_norm: r_norm,
                iterations: iter,
                converged: true,
            });
        }

        let jac = jacobian_fn(&x)?;

        // Solve J * dx = -r
        let dx = jac
            .lu()
            .solve(&(-r.clone()))
            .ok_or_else(|| SolverError::SingularJacobian {
                what: format!("LU solve failed at iteration {}", iter),
            })?;

        // Line search
        let mut alpha = 1.0;
        let mut x_new = &x + alpha * &dx;
        let mut r_new = residual_fn(&x_new)?;
        let mut r_new_norm = r_new.norm();

        for _ in 0..config.max_line_search_iters {
            if r_new_norm.is_finite() && r_new_norm < r_norm {
                break;
            }
            alpha *= config.line_search_beta;
            x_new = &x + alpha * &dx;
            r_new = residual_fn(&x_new)?;
            r_new_norm = r_new.norm();
        }

        if !r_new_norm.is_finite() {
            return Err(SolverError::Diverged {
                what: "non-finite residual".to_string(),
                iteration: iter,
            });
        }

        let step_norm = alpha * dx.norm();
        x = x_new;
        r = r_new;
        r_norm = r_new_norm;

        // Only a full Newton step says anything about the distance to the root
        if alpha == 1.0 && step_norm <= config.step_tol * (1.0 + x.norm()) {
            return Ok(NewtonResult {
                x,
                residual_norm: r_norm,
                iterations: iter + 1,
                converged: true,
            });
        }

        if alpha < 1e-10 {
            return Err(SolverError::ConvergenceFailed {
                what: format!("line search stagnated, residual = {:e}", r_norm),
                iterations: iter + 1,
            });
        }
    }

    if r_norm <= config.abs_tol || r_norm <= config.rel_tol * r0_norm {
        return Ok(NewtonResult {
            x,
            residual_norm: r_norm,
            iterations: config.max_iterations,
            converged: true,
        });
    }

    Err(SolverError::ConvergenceFailed {
        what: format!("iteration budget exhausted, residual = {:e}", r_norm),
        iterations: config.max_iterations,
    })
}
