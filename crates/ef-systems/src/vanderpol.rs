//! Forced Van der Pol oscillator.
//!
//! ```text
//! x' = w v
//! v' = w (eps (1 - x^2) v - x) + sum_i A_i cos(2 pi t / T_i)
//! ```
//!
//! with `w = 2 pi / T_nat`. For `T_nat = 2 pi` this is the classical form
//! `x'' - eps (1 - x^2) x' + x = forcing`; other values rescale time so that
//! the small-`eps` oscillation has period `T_nat`.

use std::f64::consts::TAU;

use ef_core::{CoreError, CoreResult, Matrix, ParamSystem, Real, State};

/// Parameters of the forced oscillator.
#[derive(Clone, Debug, PartialEq)]
pub struct VanDerPolParams {
    /// Nonlinear damping strength
    pub epsilon: Real,
    /// Forcing amplitudes `A_i`
    pub amplitudes: Vec<Real>,
    /// Forcing periods `T_i`
    pub periods: Vec<Real>,
    /// Period of the unforced small-`epsilon` oscillation
    pub natural_period: Real,
}

impl VanDerPolParams {
    /// Classical time scale (natural period `2 pi`).
    pub fn new(epsilon: Real, amplitudes: Vec<Real>, periods: Vec<Real>) -> CoreResult<Self> {
        Self::with_natural_period(epsilon, amplitudes, periods, TAU)
    }

    pub fn with_natural_period(
        epsilon: Real,
        amplitudes: Vec<Real>,
        periods: Vec<Real>,
        natural_period: Real,
    ) -> CoreResult<Self> {
        if !epsilon.is_finite() {
            return Err(CoreError::NonFinite {
                what: "epsilon",
                value: epsilon,
            });
        }
        if amplitudes.len() != periods.len() {
            return Err(CoreError::DimensionMismatch {
                what: "forcing amplitudes",
                expected: periods.len(),
                found: amplitudes.len(),
            });
        }
        if periods.iter().any(|p| !(p.is_finite() && *p > 0.0)) {
            return Err(CoreError::InvalidArg {
                what: "forcing periods must be positive",
            });
        }
        if amplitudes.iter().any(|a| !a.is_finite()) {
            return Err(CoreError::InvalidArg {
                what: "forcing amplitudes must be finite",
            });
        }
        if !(natural_period.is_finite() && natural_period > 0.0) {
            return Err(CoreError::InvalidArg {
                what: "natural period must be positive",
            });
        }
        Ok(Self {
            epsilon,
            amplitudes,
            periods,
            natural_period,
        })
    }

    /// Periods of the forcing terms, the candidates for the envelope period.
    pub fn forcing_periods(&self) -> &[Real] {
        &self.periods
    }

    fn omega(&self) -> Real {
        TAU / self.natural_period
    }

    fn forcing(&self, t: Real) -> Real {
        self.amplitudes
            .iter()
            .zip(&self.periods)
            .map(|(a, p)| a * (TAU * t / p).cos())
            .sum()
    }
}

fn rhs(t: Real, y: &State, p: &VanDerPolParams) -> State {
    let w = p.omega();
    let (x, v) = (y[0], y[1]);
    State::from_vec(vec![
        w * v,
        w * (p.epsilon * (1.0 - x * x) * v - x) + p.forcing(t),
    ])
}

fn jacobian(_t: Real, y: &State, p: &VanDerPolParams) -> Matrix {
    let w = p.omega();
    let (x, v) = (y[0], y[1]);
    Matrix::from_row_slice(
        2,
        2,
        &[
            0.0,
            w,
            w * (-2.0 * p.epsilon * x * v - 1.0),
            w * p.epsilon * (1.0 - x * x),
        ],
    )
}

/// The oscillator as a two-state system with analytic Jacobian.
pub fn van_der_pol(params: VanDerPolParams) -> CoreResult<ParamSystem<VanDerPolParams>> {
    Ok(ParamSystem::new(2, params, rhs)?.with_jacobian(jacobian))
}
