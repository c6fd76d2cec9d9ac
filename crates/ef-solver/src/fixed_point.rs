//! Relaxed fixed-point iteration for implicit equations `x = g(x)`.
//!
//! Used when no Jacobian is available. Convergence requires `g` to be a
//! contraction near the solution; for stiff problems it usually is not, so
//! the iteration watches for growing updates and gives up early.

use crate::error::{SolverError, SolverResult};
use crate::newton::NewtonResult;
use ef_core::State;

/// Fixed-point iteration configuration.
#[derive(Clone, Debug)]
pub struct FixedPointConfig {
    /// Maximum iterations
    pub max_iterations: usize,
    /// Relaxation factor in (0, 1]: x <- (1 - w) x + w g(x)
    pub relaxation: f64,
    /// Absolute tolerance on the update norm
    pub abs_tol: f64,
    /// Relative tolerance on the update norm
    pub rel_tol: f64,
    /// Consecutive growing updates tolerated before declaring divergence
    pub divergence_window: usize,
}

impl Default for FixedPointConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            relaxation: 1.0,
            abs_tol: 1e-10,
            rel_tol: 1e-10,
            divergence_window: 3,
        }
    }
}

impl FixedPointConfig {
    pub fn validate(&self) -> SolverResult<()> {
        if self.max_iterations == 0 {
            return Err(SolverError::InvalidConfig {
                what: "max_iterations must be positive".to_string(),
            });
        }
        if !(self.relaxation > 0.0 && self.relaxation <= 1.0) {
            return Err(SolverError::InvalidConfig {
                what: format!("relaxation must be in (0, 1], got {}", self.relaxation),
            });
        }
        if self.divergence_window == 0 {
            return Err(SolverError::InvalidConfig {
                what: "divergence_window must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Solve `x = g(x)` by relaxed successive substitution.
///
/// `residual_norm` in the result is the norm of the last update.
pub fn fixed_point_solve<G>(
    x0: State,
    map_fn: G,
    config: &FixedPointConfig,
) -> SolverResult<NewtonResult>
where
    G: Fn(&State) -> SolverResult<State>,
{
    let w = config.relaxation;
    let mut x = x0;
    let mut last_update = f64::INFINITY;
    let mut growing = 0usize;

    for iter in 0..config.max_iterations {
        let gx = map_fn(&x)?;
        let x_new = (1.0 - w) * &x + w * gx;
        let update = (&x_new - &x).norm();

        if !update.is_finite() {
            return Err(SolverError::Diverged {
                what: "non-finite iterate".to_string(),
                iteration: iter,
            });
        }

        x = x_new;

        if update <= config.abs_tol + config.rel_tol * x.norm() {
            return Ok(NewtonResult {
                x,
                residual_norm: update,
                iterations: iter + 1,
                converged: true,
            });
        }

        if update > last_update {
            growing += 1;
            if growing >= config.divergence_window {
                return Err(SolverError::Diverged {
                    what: format!("update norm grew for {} iterations ({:e})", growing, update),
                    iteration: iter,
                });
            }
        } else {
            growing = 0;
        }
        last_update = update;
    }

    Err(SolverError::ConvergenceFailed {
        what: format!("iteration budget exhausted, last update = {:e}", last_update),
        iterations: config.max_iterations,
    })
}
