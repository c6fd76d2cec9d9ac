//! Fixed-step backward differentiation formulas of order 1 to 4.
//!
//! Step `n+1` solves
//!
//! ```text
//! y_{n+1} + sum_{j=1..k} a_j y_{n+1-j} = h b F(t_{n+1}, y_{n+1})
//! ```
//!
//! for `y_{n+1}`. The order ramps up from 1 while history accumulates, and a
//! step whose length differs from the previous one restarts at order 1.

use std::collections::VecDeque;

use crate::error::{SimError, SimResult};
use crate::integrator::{FixedStepper, StepCounters, StepReport};
use crate::options::{MAX_FIXED_ORDER, NonlinearMethod};
use ef_core::{Matrix, OdeSystem, Real, State};
use ef_solver::{
    FORWARD_EPS, FixedPointConfig, NewtonConfig, NewtonResult, SolverError, SolverResult,
    finite_difference_jacobian, fixed_point_solve, newton_solve,
};
use tracing::{debug, warn};

static BDF1: [Real; 1] = [-1.0];
static BDF2: [Real; 2] = [-4.0 / 3.0, 1.0 / 3.0];
static BDF3: [Real; 3] = [-18.0 / 11.0, 9.0 / 11.0, -2.0 / 11.0];
static BDF4: [Real; 4] = [-48.0 / 25.0, 36.0 / 25.0, -16.0 / 25.0, 3.0 / 25.0];

/// History coefficients `a_1..a_k` and the right-hand side weight `b`.
pub fn bdf_coefficients(order: usize) -> (&'static [Real], Real) {
    match order {
        1 => (&BDF1, 1.0),
        2 => (&BDF2, 2.0 / 3.0),
        3 => (&BDF3, 6.0 / 11.0),
        _ => (&BDF4, 12.0 / 25.0),
    }
}

/// Relative change of step length that forces a restart.
const STEP_CHANGE_TOL: Real = 1e-9;

/// Fixed-step BDF stepper.
#[derive(Clone, Debug)]
pub struct FixedBdf {
    order: usize,
    nonlinear: NonlinearMethod,
    newton: NewtonConfig,
    fixed_point: FixedPointConfig,
    /// Accepted states, most recent first
    history: VecDeque<State>,
    h_history: Option<Real>,
    counters: StepCounters,
}

impl FixedBdf {
    pub fn new(order: usize) -> SimResult<Self> {
        if !(1..=MAX_FIXED_ORDER).contains(&order) {
            return Err(SimError::config(format!(
                "BDF order must be in 1..={MAX_FIXED_ORDER}, got {order}"
            )));
        }
        Ok(Self {
            order,
            nonlinear: NonlinearMethod::Auto,
            newton: NewtonConfig::default(),
            fixed_point: FixedPointConfig::default(),
            history: VecDeque::with_capacity(MAX_FIXED_ORDER),
            h_history: None,
            counters: StepCounters::default(),
        })
    }

    pub fn with_nonlinear(mut self, nonlinear: NonlinearMethod) -> Self {
        self.nonlinear = nonlinear;
        self
    }

    pub fn with_newton(mut self, newton: NewtonConfig) -> Self {
        self.newton = newton;
        self
    }

    pub fn with_fixed_point(mut self, fixed_point: FixedPointConfig) -> Self {
        self.fixed_point = fixed_point;
        self
    }

    /// Target order.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Order the next step of length `h` will use.
    pub fn current_order(&self, h: Real) -> usize {
        if self.same_step(h) {
            self.history.len().min(self.order)
        } else {
            1
        }
    }

    fn same_step(&self, h: Real) -> bool {
        matches!(self.h_history, Some(prev) if (h - prev).abs() <= STEP_CHANGE_TOL * prev.abs())
    }

    fn uses_newton<S: OdeSystem + ?Sized>(&self, system: &S) -> bool {
        match self.nonlinear {
            NonlinearMethod::Auto => system.has_jacobian(),
            NonlinearMethod::Newton => true,
            NonlinearMethod::FixedPoint => false,
        }
    }

    /// Newton iteration on `x - psi - c F(t, x) = 0`.
    ///
    /// With `analytic` the iteration matrix is rebuilt from the system
    /// Jacobian every iteration; otherwise a difference Jacobian is formed
    /// once at the predictor and reused.
    fn solve_newton<S: OdeSystem + ?Sized>(
        &mut self,
        system: &S,
        t_new: Real,
        psi: &State,
        c: Real,
        predictor: &State,
        analytic: bool,
    ) -> SolverResult<NewtonResult> {
        let n = psi.len();
        let residual = |x: &State| -> SolverResult<State> {
            let f = system.rhs(t_new, x)?;
            Ok(x - psi - c * f)
        };

        if analytic {
            let lu = std::cell::Cell::new(0usize);
            let jacobian = |x: &State| -> SolverResult<Matrix> {
                let j = system.jacobian(t_new, x)?.ok_or_else(|| SolverError::InvalidConfig {
                    what: "system reported an analytic Jacobian but returned none".to_string(),
                })?;
                lu.set(lu.get() + 1);
                Ok(Matrix::identity(n, n) - c * j)
            };
            let result = newton_solve(predictor.clone(), residual, jacobian, &self.newton);
            self.counters.lu_decompositions += lu.get();
            return result;
        }

        let j = finite_difference_jacobian(
            predictor,
            None,
            |x: &State| Ok(system.rhs(t_new, x)?),
            FORWARD_EPS,
        )?;
        self.counters.fd_jacobians += 1;
        let iteration = Matrix::identity(n, n) - c * j;
        let uses = std::cell::Cell::new(0usize);
        let jacobian = |_x: &State| -> SolverResult<Matrix> {
            uses.set(uses.get() + 1);
            Ok(iteration.clone())
        };
        let result = newton_solve(predictor.clone(), residual, jacobian, &self.newton);
        self.counters.lu_decompositions += uses.get();
        result
    }

    fn solve_fixed_point<S: OdeSystem + ?Sized>(
        &self,
        system: &S,
        t_new: Real,
        psi: &State,
        c: Real,
        predictor: &State,
    ) -> SolverResult<NewtonResult> {
        let map = |x: &State| -> SolverResult<State> {
            let f = system.rhs(t_new, x)?;
            Ok(psi + c * f)
        };
        fixed_point_solve(predictor.clone(), map, &self.fixed_point)
    }

    /// Solve the stage equation, falling back from a singular analytic
    /// Jacobian to differences and from there to fixed-point iteration.
    fn solve_stage<S: OdeSystem + ?Sized>(
        &mut self,
        system: &S,
        t_new: Real,
        psi: &State,
        c: Real,
        predictor: &State,
    ) -> SolverResult<NewtonResult> {
        if !self.uses_newton(system) {
            return self.solve_fixed_point(system, t_new, psi, c, predictor);
        }

        if system.has_jacobian() {
            match self.solve_newton(system, t_new, psi, c, predictor, true) {
                Err(SolverError::SingularJacobian { what }) => {
                    warn!(t = t_new, %what, "singular analytic iteration matrix, using differences");
                }
                other => return other,
            }
        }

        match self.solve_newton(system, t_new, psi, c, predictor, false) {
            Err(SolverError::SingularJacobian { what }) => {
                warn!(t = t_new, %what, "singular difference iteration matrix, using fixed-point");
                self.solve_fixed_point(system, t_new, psi, c, predictor)
            }
            other => other,
        }
    }
}

impl FixedStepper for FixedBdf {
    fn step<S: OdeSystem + ?Sized>(
        &mut self,
        system: &S,
        t: Real,
        y: &State,
        h: Real,
    ) -> SimResult<StepReport> {
        if !self.same_step(h) || self.history.is_empty() {
            self.history.clear();
            self.history.push_front(y.clone());
            self.h_history = Some(h);
        }

        let k = self.history.len().min(self.order);
        let (a, b) = bdf_coefficients(k);

        let mut psi = State::zeros(y.len());
        for (aj, yj) in a.iter().zip(self.history.iter()) {
            psi -= *aj * yj;
        }

        let predictor = match (self.history.front(), self.history.get(1)) {
            (Some(y0), Some(y1)) => 2.0 * y0 - y1,
            _ => y.clone(),
        };

        let t_new = t + h;
        let c = h * b;
        let result = match self.solve_stage(system, t_new, &psi, c, &predictor) {
            Ok(result) => result,
            Err(e) => {
                self.counters.nonlinear_failures += 1;
                return Err(SimError::StepFailed {
                    t,
                    reason: format!("BDF{k} stage solve failed: {e}"),
                });
            }
        };
        debug!(t = t_new, order = k, iterations = result.iterations, "BDF step");

        self.history.push_front(result.x.clone());
        self.history.truncate(self.order);

        Ok(StepReport {
            y: result.x,
            iterations: result.iterations,
        })
    }

    fn restart(&mut self) {
        self.history.clear();
        self.h_history = None;
    }

    fn counters(&self) -> StepCounters {
        self.counters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ef_core::ParamSystem;

    fn decay(_t: Real, y: &State, k: &Real) -> State {
        -*k * y
    }

    fn decay_jac(_t: Real, _y: &State, k: &Real) -> Matrix {
        Matrix::from_element(1, 1, -*k)
    }

    #[test]
    fn coefficients_are_consistent() {
        // A BDF formula is exact on constants: 1 + sum a_j = 0
        for order in 1..=MAX_FIXED_ORDER {
            let (a, _) = bdf_coefficients(order);
            assert_eq!(a.len(), order);
            let sum: Real = a.iter().sum();
            assert!((1.0 + sum).abs() < 1e-14, "order {order}");
        }
    }

    #[test]
    fn order_ramps_up() {
        let sys = ParamSystem::new(1, 1.0, decay).unwrap().with_jacobian(decay_jac);
        let mut bdf = FixedBdf::new(3).unwrap();
        let mut y = State::from_element(1, 1.0);
        let h = 0.1;

        let mut orders = Vec::new();
        for n in 0..5 {
            orders.push(bdf.current_order(h));
            y = bdf.step(&sys, n as Real * h, &y, h).unwrap().y;
        }
        assert_eq!(orders, vec![1, 2, 3, 3, 3]);

        // Different step length restarts at order 1
        assert_eq!(bdf.current_order(0.05), 1);
    }

    #[test]
    fn fixed_point_and_newton_agree_on_mild_problem() {
        let sys = ParamSystem::new(1, 0.5, decay).unwrap().with_jacobian(decay_jac);
        let y0 = State::from_element(1, 1.0);

        let mut newton = FixedBdf::new(2).unwrap().with_nonlinear(NonlinearMethod::Newton);
        let mut fixed = FixedBdf::new(2).unwrap().with_nonlinear(NonlinearMethod::FixedPoint);

        let (mut a, mut b) = (y0.clone(), y0);
        for n in 0..10 {
            let t = n as Real * 0.1;
            a = newton.step(&sys, t, &a, 0.1).unwrap().y;
            b = fixed.step(&sys, t, &b, 0.1).unwrap().y;
        }
        assert!((a[0] - b[0]).abs() < 1e-8);
    }

    #[test]
    fn newton_without_jacobian_uses_differences() {
        let sys = ParamSystem::new(1, 50.0, decay).unwrap();
        let mut bdf = FixedBdf::new(1).unwrap().with_nonlinear(NonlinearMethod::Newton);
        let y = bdf.step(&sys, 0.0, &State::from_element(1, 1.0), 0.1).unwrap().y;
        // Implicit Euler: 1 / (1 + 5)
        assert!((y[0] - 1.0 / 6.0).abs() < 1e-8);
        assert_eq!(bdf.counters().fd_jacobians, 1);
    }

    #[test]
    fn stiff_fixed_point_divergence_is_a_step_failure() {
        // h b |lambda| = 10: the fixed-point map is expanding
        let sys = ParamSystem::new(1, 100.0, decay).unwrap();
        let mut bdf = FixedBdf::new(1).unwrap();
        let err = bdf
            .step(&sys, 0.0, &State::from_element(1, 1.0), 0.1)
            .unwrap_err();
        assert!(matches!(err, SimError::StepFailed { .. }));
        assert_eq!(bdf.counters().nonlinear_failures, 1);
    }
}
