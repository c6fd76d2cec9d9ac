//! Integration options and their validation.

use crate::error::{SimError, SimResult};
use ef_core::{Real, Tolerance};
use ef_solver::{FixedPointConfig, NewtonConfig};

/// Highest order of the fixed-step BDF family.
pub const MAX_FIXED_ORDER: usize = 4;

/// Highest order of the variable-step BDF.
pub const MAX_VARIABLE_ORDER: usize = 5;

/// Integration method selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Method {
    /// Forward Euler with a fixed step (reference baseline, no error control).
    ExplicitEuler,
    /// Backward differentiation formula of fixed order and fixed step.
    BdfFixed,
    /// Variable-order, variable-step BDF with error control (default).
    #[default]
    BdfVariable,
}

impl Method {
    pub fn is_fixed_step(self) -> bool {
        matches!(self, Method::ExplicitEuler | Method::BdfFixed)
    }
}

/// How the implicit stage equation of the fixed-step BDF is solved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NonlinearMethod {
    /// Newton when the system has an analytic Jacobian, fixed-point otherwise.
    #[default]
    Auto,
    /// Newton iteration, with a finite-difference Jacobian if needed.
    Newton,
    /// Relaxed fixed-point iteration, no Jacobian at all.
    FixedPoint,
}

/// Options for `integrate`.
#[derive(Clone, Debug)]
pub struct IntegrateOptions {
    /// Integration method
    pub method: Method,
    /// Fixed step size (required by the fixed-step methods)
    pub step: Option<Real>,
    /// BDF order: exact order for `BdfFixed` (1..=4, default 2),
    /// maximum order for `BdfVariable` (1..=5, default 5)
    pub order: Option<usize>,
    /// Absolute tolerance (variable step only)
    pub atol: Tolerance,
    /// Relative tolerance (variable step only)
    pub rtol: Tolerance,
    /// Period hint: variable steps are whole multiples of it
    pub period: Option<Real>,
    /// Initial step for the variable-step method (estimated when absent)
    pub first_step: Option<Real>,
    /// Upper bound on the variable step size
    pub max_step: Option<Real>,
    /// Nonlinear solver policy for the fixed-step BDF
    pub nonlinear: NonlinearMethod,
    /// Newton settings for the fixed-step BDF
    pub newton: NewtonConfig,
    /// Fixed-point settings for the fixed-step BDF
    pub fixed_point: FixedPointConfig,
    /// Maximum number of accepted steps (safety limit)
    pub max_steps: usize,
    /// Record every N-th accepted step (decimation); the final state is always kept
    pub record_every: usize,
    /// Steps whose nonlinear solve needs more iterations than this are counted as slow
    pub slow_iteration_threshold: usize,
}

impl Default for IntegrateOptions {
    fn default() -> Self {
        Self {
            method: Method::default(),
            step: None,
            order: None,
            atol: Tolerance::Scalar(1e-6),
            rtol: Tolerance::Scalar(1e-3),
            period: None,
            first_step: None,
            max_step: None,
            nonlinear: NonlinearMethod::default(),
            newton: NewtonConfig::default(),
            fixed_point: FixedPointConfig::default(),
            max_steps: 1_000_000,
            record_every: 1,
            slow_iteration_threshold: 3,
        }
    }
}

impl IntegrateOptions {
    /// Forward Euler with step `h`.
    pub fn explicit_euler(h: Real) -> Self {
        Self {
            method: Method::ExplicitEuler,
            step: Some(h),
            ..Self::default()
        }
    }

    /// Fixed-step BDF of the given order with step `h`.
    pub fn bdf_fixed(h: Real, order: usize) -> Self {
        Self {
            method: Method::BdfFixed,
            step: Some(h),
            order: Some(order),
            ..Self::default()
        }
    }

    /// Variable-step BDF with the given tolerances.
    pub fn bdf_variable(rtol: impl Into<Tolerance>, atol: impl Into<Tolerance>) -> Self {
        Self {
            method: Method::BdfVariable,
            rtol: rtol.into(),
            atol: atol.into(),
            ..Self::default()
        }
    }

    pub fn with_period(mut self, period: Real) -> Self {
        self.period = Some(period);
        self
    }

    pub fn with_nonlinear(mut self, nonlinear: NonlinearMethod) -> Self {
        self.nonlinear = nonlinear;
        self
    }

    pub fn with_max_step(mut self, max_step: Real) -> Self {
        self.max_step = Some(max_step);
        self
    }

    pub fn with_first_step(mut self, first_step: Real) -> Self {
        self.first_step = Some(first_step);
        self
    }

    /// Resolved BDF order for the selected method.
    pub fn resolved_order(&self) -> usize {
        match (self.method, self.order) {
            (_, Some(order)) => order,
            (Method::BdfVariable, None) => MAX_VARIABLE_ORDER,
            (_, None) => 2,
        }
    }

    /// Check everything that does not depend on the system.
    pub fn validate(&self, dim: usize) -> SimResult<()> {
        if self.method.is_fixed_step() {
            match self.step {
                None => {
                    return Err(SimError::config(format!(
                        "{:?} requires a fixed step",
                        self.method
                    )));
                }
                Some(h) if !(h.is_finite() && h > 0.0) => {
                    return Err(SimError::config(format!("step must be positive, got {h}")));
                }
                _ => {}
            }
        } else if let Some(h) = self.step {
            if !(h.is_finite() && h > 0.0) {
                return Err(SimError::config(format!("step must be positive, got {h}")));
            }
        }

        let order = self.resolved_order();
        match self.method {
            Method::BdfFixed if !(1..=MAX_FIXED_ORDER).contains(&order) => {
                return Err(SimError::config(format!(
                    "BDF order must be in 1..={MAX_FIXED_ORDER}, got {order}"
                )));
            }
            Method::BdfVariable if !(1..=MAX_VARIABLE_ORDER).contains(&order) => {
                return Err(SimError::config(format!(
                    "maximum BDF order must be in 1..={MAX_VARIABLE_ORDER}, got {order}"
                )));
            }
            _ => {}
        }

        self.atol
            .validate(dim, "atol")
            .map_err(|e| SimError::config(e.to_string()))?;
        self.rtol
            .validate(dim, "rtol")
            .map_err(|e| SimError::config(e.to_string()))?;

        for (name, value) in [
            ("period", self.period),
            ("first_step", self.first_step),
            ("max_step", self.max_step),
        ] {
            if let Some(v) = value {
                if !(v.is_finite() && v > 0.0) {
                    return Err(SimError::config(format!("{name} must be positive, got {v}")));
                }
            }
        }
        if let (Some(period), Some(max_step)) = (self.period, self.max_step) {
            if max_step < period {
                return Err(SimError::config(format!(
                    "max_step {max_step} is shorter than the period {period}"
                )));
            }
        }

        if self.max_steps == 0 {
            return Err(SimError::config("max_steps must be positive"));
        }
        if self.record_every == 0 {
            return Err(SimError::config("record_every must be positive"));
        }

        self.newton
            .validate()
            .map_err(|e| SimError::config(e.to_string()))?;
        self.fixed_point
            .validate()
            .map_err(|e| SimError::config(e.to_string()))?;
        Ok(())
    }
}
