//! Envelope solve options.

use crate::error::{EnvelopeError, EnvelopeResult};
use crate::period::Period;
use ef_core::Real;
use ef_sim::{IntegrateOptions, MAX_FIXED_ORDER, MAX_VARIABLE_ORDER, NonlinearMethod};
use ef_solver::{FixedPointConfig, NewtonConfig};

/// How the envelope system is stepped.
#[derive(Clone, Debug, PartialEq)]
pub enum MacroStepping {
    /// Fixed-step BDF on the grid `t0 + n H`, `H` a whole number of periods.
    Fixed { step: Real, order: usize },
    /// Variable-order BDF whose steps are whole numbers of periods.
    Variable {
        rtol: Real,
        atol: Real,
        max_order: usize,
        /// First macro step (one period when absent)
        first_step: Option<Real>,
        /// Upper bound on the macro step
        max_step: Option<Real>,
    },
    /// Trapezoidal rule with a local error estimate; each step is the
    /// largest whole number of periods the estimate admits.
    Trapezoidal {
        rtol: Real,
        atol: Real,
        /// Longest macro step, in periods
        max_step_periods: usize,
    },
}

/// Default cap on a trapezoidal macro step, in periods.
pub const DEFAULT_MAX_STEP_PERIODS: usize = 1000;

/// Default bound on the change of an estimated period over one macro step.
pub const DEFAULT_PERIOD_TOL: Real = 1e-2;

/// Fine trajectories computed after the macro solve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Reconstruction {
    #[default]
    None,
    /// Integrate the fast system for `periods` periods from every macro sample.
    Window { periods: usize },
}

/// Options for `envelope_full`.
#[derive(Clone, Debug)]
pub struct EnvelopeOptions {
    pub period: Period,
    /// With an estimated period: largest change of the period over one
    /// macro step before the step is redone shorter
    pub period_tol: Real,
    pub macro_stepping: MacroStepping,
    /// Integrator for the nested one-period solves
    pub inner: IntegrateOptions,
    pub reconstruct: Reconstruction,
    /// Nonlinear policy of the fixed macro stepper
    pub nonlinear: NonlinearMethod,
    /// Newton settings of the fixed macro stepper
    pub newton: NewtonConfig,
    /// Fixed-point settings of the fixed macro stepper
    pub fixed_point: FixedPointConfig,
    /// Failed macro steps that may be replaced by one-period maps
    /// (`None`: no limit)
    pub max_fallbacks: Option<usize>,
    /// Safety limit on macro steps
    pub max_macro_steps: usize,
}

impl EnvelopeOptions {
    /// Fixed macro step `step` of BDF order `order`.
    pub fn fixed(period: Period, step: Real, order: usize) -> Self {
        Self::with_stepping(period, MacroStepping::Fixed { step, order })
    }

    /// Variable macro steps with error control.
    pub fn variable(period: Period, rtol: Real, atol: Real) -> Self {
        Self::with_stepping(
            period,
            MacroStepping::Variable {
                rtol,
                atol,
                max_order: MAX_VARIABLE_ORDER,
                first_step: None,
                max_step: None,
            },
        )
    }

    /// Trapezoidal macro steps with error control.
    pub fn trapezoidal(period: Period, rtol: Real, atol: Real) -> Self {
        Self::with_stepping(
            period,
            MacroStepping::Trapezoidal {
                rtol,
                atol,
                max_step_periods: DEFAULT_MAX_STEP_PERIODS,
            },
        )
    }

    fn with_stepping(period: Period, macro_stepping: MacroStepping) -> Self {
        Self {
            period,
            period_tol: DEFAULT_PERIOD_TOL,
            macro_stepping,
            inner: IntegrateOptions::bdf_variable(1e-10, 1e-12),
            reconstruct: Reconstruction::None,
            // The envelope has no analytic Jacobian; Newton uses differences.
            nonlinear: NonlinearMethod::Newton,
            // Every residual carries the error of a nested integration, so
            // the macro solve cannot converge much below it.
            newton: NewtonConfig {
                max_iterations: 20,
                abs_tol: 1e-8,
                rel_tol: 1e-9,
                step_tol: 1e-9,
                ..NewtonConfig::default()
            },
            fixed_point: FixedPointConfig {
                abs_tol: 1e-8,
                rel_tol: 1e-8,
                ..FixedPointConfig::default()
            },
            max_fallbacks: None,
            max_macro_steps: 100_000,
        }
    }

    pub fn with_inner(mut self, inner: IntegrateOptions) -> Self {
        self.inner = inner;
        self
    }

    pub fn with_reconstruction(mut self, reconstruct: Reconstruction) -> Self {
        self.reconstruct = reconstruct;
        self
    }

    pub fn with_period_tol(mut self, period_tol: Real) -> Self {
        self.period_tol = period_tol;
        self
    }

    pub fn with_max_fallbacks(mut self, max_fallbacks: usize) -> Self {
        self.max_fallbacks = Some(max_fallbacks);
        self
    }

    /// Check everything that does not depend on the system.
    pub fn validate(&self) -> EnvelopeResult<()> {
        self.period.validate()?;
        if !(self.period_tol.is_finite() && self.period_tol > 0.0) {
            return Err(EnvelopeError::config(format!(
                "period_tol must be positive, got {}",
                self.period_tol
            )));
        }
        match self.macro_stepping {
            MacroStepping::Fixed { step, order } => {
                if !(step.is_finite() && step > 0.0) {
                    return Err(EnvelopeError::config(format!(
                        "macro step must be positive, got {step}"
                    )));
                }
                if !(1..=MAX_FIXED_ORDER).contains(&order) {
                    return Err(EnvelopeError::config(format!(
                        "macro BDF order must be in 1..={MAX_FIXED_ORDER}, got {order}"
                    )));
                }
            }
            MacroStepping::Variable {
                rtol,
                atol,
                max_order,
                first_step,
                max_step,
            } => {
                check_tolerances(rtol, atol)?;
                if !(1..=MAX_VARIABLE_ORDER).contains(&max_order) {
                    return Err(EnvelopeError::config(format!(
                        "maximum macro BDF order must be in 1..={MAX_VARIABLE_ORDER}, got {max_order}"
                    )));
                }
                for (name, value) in [("first_step", first_step), ("max_step", max_step)] {
                    if let Some(v) = value {
                        if !(v.is_finite() && v > 0.0) {
                            return Err(EnvelopeError::config(format!(
                                "macro {name} must be positive, got {v}"
                            )));
                        }
                    }
                }
            }
            MacroStepping::Trapezoidal {
                rtol,
                atol,
                max_step_periods,
            } => {
                check_tolerances(rtol, atol)?;
                if max_step_periods == 0 {
                    return Err(EnvelopeError::config(
                        "max_step_periods must be at least one",
                    ));
                }
            }
        }
        if let Reconstruction::Window { periods: 0 } = self.reconstruct {
            return Err(EnvelopeError::config(
                "reconstruction window must span at least one period",
            ));
        }
        if self.max_macro_steps == 0 {
            return Err(EnvelopeError::config("max_macro_steps must be positive"));
        }
        self.newton
            .validate()
            .map_err(|e| EnvelopeError::config(e.to_string()))?;
        self.fixed_point
            .validate()
            .map_err(|e| EnvelopeError::config(e.to_string()))?;
        Ok(())
    }
}

fn check_tolerances(rtol: Real, atol: Real) -> EnvelopeResult<()> {
    if !(rtol.is_finite() && rtol > 0.0) || !(atol.is_finite() && atol >= 0.0) {
        return Err(EnvelopeError::config(format!(
            "macro tolerances must be positive, got rtol={rtol} atol={atol}"
        )));
    }
    Ok(())
}
