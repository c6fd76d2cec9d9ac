//! Variable-order, variable-step BDF with error control.
//!
//! Quasi-constant step formulation: the solution history is a table of
//! modified backward differences `D`, rescaled whenever the step changes.
//! Each step is a simplified Newton solve with a frozen iteration matrix;
//! the Jacobian is refreshed once when Newton stalls, after which the step is
//! halved. Order and step are re-selected after `order + 1` equal steps.
//!
//! With a period hint every step length is a whole multiple of the period
//! and never shorter than one period.

use crate::error::{SimError, SimResult};
use crate::integrator::StepCounters;
use crate::options::{IntegrateOptions, MAX_VARIABLE_ORDER};
use ef_core::{Matrix, OdeSystem, Real, State, Tolerance, error_scale, weighted_rms_norm};
use ef_solver::{FORWARD_EPS, finite_difference_jacobian};
use nalgebra::{Dyn, LU};
use tracing::{debug, warn};

const NEWTON_MAXITER: usize = 4;
const MIN_FACTOR: Real = 0.2;
const MAX_FACTOR: Real = 10.0;

/// Steps ending this close to the bound (relative to the step) are stretched to it.
const BOUND_SNAP: Real = 1e-9;

/// Slack when counting whole periods in a step.
const PERIOD_SLACK: Real = 1e-9;

/// NDF coefficients (scipy's BDF default), indexed by order.
const KAPPA: [Real; MAX_VARIABLE_ORDER + 1] = [0.0, -0.1850, -1.0 / 9.0, -0.0823, -0.0415, 0.0];

/// Method constants derived from `KAPPA`.
#[derive(Clone, Debug)]
struct Coefficients {
    gamma: [Real; MAX_VARIABLE_ORDER + 1],
    alpha: [Real; MAX_VARIABLE_ORDER + 1],
    error_const: [Real; MAX_VARIABLE_ORDER + 1],
}

impl Coefficients {
    fn new() -> Self {
        let mut gamma = [0.0; MAX_VARIABLE_ORDER + 1];
        for k in 1..=MAX_VARIABLE_ORDER {
            gamma[k] = gamma[k - 1] + 1.0 / k as Real;
        }
        let mut alpha = [0.0; MAX_VARIABLE_ORDER + 1];
        let mut error_const = [0.0; MAX_VARIABLE_ORDER + 1];
        for k in 0..=MAX_VARIABLE_ORDER {
            alpha[k] = (1.0 - KAPPA[k]) * gamma[k];
            error_const[k] = KAPPA[k] * gamma[k] + 1.0 / (k + 1) as Real;
        }
        Self {
            gamma,
            alpha,
            error_const,
        }
    }
}

/// `R` matrix of the difference-table step change: cumulative product down
/// the columns of `M[i][j] = (i - 1 - factor j) / i`, `M[0][j] = 1`.
fn compute_r(order: usize, factor: Real) -> Matrix {
    let mut m = Matrix::zeros(order + 1, order + 1);
    for j in 0..=order {
        m[(0, j)] = 1.0;
    }
    for i in 1..=order {
        for j in 1..=order {
            m[(i, j)] = (i as Real - 1.0 - factor * j as Real) / i as Real;
        }
    }
    for i in 1..=order {
        for j in 0..=order {
            m[(i, j)] *= m[(i - 1, j)];
        }
    }
    m
}

/// Rescale the first `order + 1` differences for a step multiplied by `factor`.
fn change_d(d: &mut [State], order: usize, factor: Real) {
    let r = compute_r(order, factor);
    let u = compute_r(order, 1.0);
    let ru = r * u;
    let old: Vec<State> = d[..=order].to_vec();
    for (i, di) in d[..=order].iter_mut().enumerate() {
        let mut acc = State::zeros(old[0].len());
        for (j, dj) in old.iter().enumerate() {
            acc += ru[(j, i)] * dj;
        }
        *di = acc;
    }
}

/// Interpolant over the last accepted step.
#[derive(Clone, Debug)]
pub struct BdfDense {
    pub t_old: Real,
    pub t: Real,
    h: Real,
    order: usize,
    d: Vec<State>,
}

impl BdfDense {
    pub fn eval(&self, t_eval: Real) -> State {
        let mut y = self.d[0].clone();
        let mut p = 1.0;
        for j in 0..self.order {
            let t_shift = self.t - self.h * j as Real;
            let denom = self.h * (j + 1) as Real;
            p *= (t_eval - t_shift) / denom;
            y += p * &self.d[j + 1];
        }
        y
    }
}

struct NewtonOutcome {
    converged: bool,
    iterations: usize,
    y: State,
    d: State,
}

/// Stepwise variable-step BDF solver over `[t0, t_bound]`.
pub struct VariableBdf<'a, S: OdeSystem + ?Sized> {
    system: &'a S,
    coeffs: Coefficients,
    t: Real,
    y: State,
    t_bound: Real,
    h_abs: Real,
    order: usize,
    max_order: usize,
    d: Vec<State>,
    n_equal_steps: usize,
    jac: Matrix,
    lu: Option<LU<Real, Dyn, Dyn>>,
    atol: Tolerance,
    rtol: Tolerance,
    newton_tol: Real,
    max_step: Real,
    period: Option<Real>,
    dense: Option<BdfDense>,
    counters: StepCounters,
    rejected_steps: usize,
    last_iterations: usize,
}

impl<'a, S: OdeSystem + ?Sized> VariableBdf<'a, S> {
    /// Set up the solver at `(t0, y0)`; evaluates `F` and the Jacobian there.
    pub fn new(
        system: &'a S,
        t0: Real,
        y0: State,
        t_bound: Real,
        opts: &IntegrateOptions,
    ) -> SimResult<Self> {
        if !(t_bound > t0) {
            return Err(SimError::config(format!(
                "end time {t_bound} must be after start time {t0}"
            )));
        }
        let n = y0.len();
        let rtol = clamp_rtol(&opts.rtol);
        let atol = opts.atol.clone();
        let rtol_min = (0..n).map(|i| rtol.component(i)).fold(Real::INFINITY, Real::min);
        let newton_tol = (10.0 * Real::EPSILON / rtol_min).max(0.03_f64.min(rtol_min.sqrt()));

        let period = opts.period;
        let round = |h: Real| round_to_period(h, period);
        let max_step = opts.max_step.map(round).unwrap_or(Real::INFINITY);

        let f0 = system.rhs(t0, &y0)?;
        let h0 = match opts.first_step {
            Some(h) => h,
            None => select_initial_step(system, t0, &y0, &f0, t_bound, &atol, &rtol)?,
        };
        let h_abs = round(h0.min(max_step));

        let mut d = vec![State::zeros(n); MAX_VARIABLE_ORDER + 3];
        d[0] = y0.clone();
        d[1] = h_abs * &f0;

        let mut counters = StepCounters::default();
        let jac = evaluate_jacobian(system, t0, &y0, Some(&f0), &mut counters)?;

        Ok(Self {
            system,
            coeffs: Coefficients::new(),
            t: t0,
            y: y0,
            t_bound,
            h_abs,
            order: 1,
            max_order: opts.resolved_order(),
            d,
            n_equal_steps: 0,
            jac,
            lu: None,
            atol,
            rtol,
            newton_tol,
            max_step,
            period,
            dense: None,
            counters,
            rejected_steps: 0,
            last_iterations: 0,
        })
    }

    pub fn t(&self) -> Real {
        self.t
    }

    pub fn y(&self) -> &State {
        &self.y
    }

    pub fn order(&self) -> usize {
        self.order
    }

    /// Step length proposed for the next step.
    pub fn step_size(&self) -> Real {
        self.h_abs
    }

    pub fn is_finished(&self) -> bool {
        self.t >= self.t_bound
    }

    /// Interpolant of the last accepted step.
    pub fn dense(&self) -> Option<&BdfDense> {
        self.dense.as_ref()
    }

    pub fn counters(&self) -> StepCounters {
        self.counters
    }

    pub fn rejected_steps(&self) -> usize {
        self.rejected_steps
    }

    /// Newton iterations of the last accepted step.
    pub fn last_iterations(&self) -> usize {
        self.last_iterations
    }

    fn min_step(&self) -> Real {
        match self.period {
            Some(p) => p,
            None => 10.0 * (self.t.abs() * Real::EPSILON).max(Real::MIN_POSITIVE),
        }
    }

    /// Multiply the step by `factor` (rounded to whole periods).
    ///
    /// Returns `false` when a reduction was requested but the step is
    /// already the shortest allowed.
    fn rescale(&mut self, h_abs: &mut Real, factor: Real) -> bool {
        let new_h = round_to_period(*h_abs * factor, self.period);
        if factor < 1.0 && self.period.is_some() && new_h >= *h_abs {
            return false;
        }
        change_d(&mut self.d, self.order, new_h / *h_abs);
        *h_abs = new_h;
        self.n_equal_steps = 0;
        true
    }

    /// Simplified Newton iteration for the corrector.
    fn solve_system(
        &self,
        t_new: Real,
        y_predict: &State,
        c: Real,
        psi: &State,
        lu: &LU<Real, Dyn, Dyn>,
        scale: &State,
    ) -> NewtonOutcome {
        let mut d = State::zeros(y_predict.len());
        let mut y = y_predict.clone();
        let mut dy_norm_old: Option<Real> = None;
        let mut converged = false;
        let mut iterations = 0;

        for k in 0..NEWTON_MAXITER {
            iterations = k + 1;
            let f = match self.system.rhs(t_new, &y) {
                Ok(f) if f.iter().all(|v| v.is_finite()) => f,
                Ok(_) => break,
                Err(e) => {
                    debug!(t = t_new, error = %e, "rhs evaluation failed in corrector");
                    break;
                }
            };
            let Some(dy) = lu.solve(&(c * f - psi - &d)) else {
                break;
            };
            let dy_norm = weighted_rms_norm(&dy, scale);
            let rate = dy_norm_old.map(|old| dy_norm / old);

            if let Some(rate) = rate {
                if rate >= 1.0
                    || rate.powi((NEWTON_MAXITER - k) as i32) / (1.0 - rate) * dy_norm
                        > self.newton_tol
                {
                    break;
                }
            }

            y += &dy;
            d += &dy;

            if dy_norm == 0.0 || rate.is_some_and(|r| r / (1.0 - r) * dy_norm < self.newton_tol) {
                converged = true;
                break;
            }
            dy_norm_old = Some(dy_norm);
        }

        NewtonOutcome {
            converged,
            iterations,
            y,
            d,
        }
    }

    /// Take one accepted step (retrying internally on rejection).
    pub fn step(&mut self) -> SimResult<()> {
        let t = self.t;
        let max_step = self.max_step;
        let min_step = self.min_step();

        let mut h_abs = self.h_abs;
        if h_abs > max_step {
            change_d(&mut self.d, self.order, max_step / h_abs);
            h_abs = max_step;
            self.n_equal_steps = 0;
            self.lu = None;
        } else if h_abs < min_step {
            change_d(&mut self.d, self.order, min_step / h_abs);
            h_abs = min_step;
            self.n_equal_steps = 0;
            self.lu = None;
        }

        let order = self.order;
        let alpha = self.coeffs.alpha[order];
        let error_const = self.coeffs.error_const[order];
        let n = self.y.len();
        let mut lu = self.lu.take();
        let mut current_jac = false;

        let (t_new, y_new, d, scale, error_norm, iterations) = loop {
            if h_abs < min_step * (1.0 - PERIOD_SLACK) {
                return Err(SimError::StepTooSmall { t, h: h_abs });
            }

            let mut t_new = t + h_abs;
            if t_new > self.t_bound || self.t_bound - t_new <= BOUND_SNAP * h_abs {
                t_new = self.t_bound;
                change_d(&mut self.d, order, (t_new - t) / h_abs);
                self.n_equal_steps = 0;
                lu = None;
            }
            let h = t_new - t;
            h_abs = h;

            let mut y_predict = self.d[0].clone();
            for di in &self.d[1..=order] {
                y_predict += di;
            }
            let scale = error_scale(&self.atol, &self.rtol, &y_predict);
            let mut psi = State::zeros(n);
            for i in 1..=order {
                psi += self.coeffs.gamma[i] * &self.d[i];
            }
            psi /= alpha;
            let c = h / alpha;

            let outcome = loop {
                let factorization = match lu.take() {
                    Some(f) => f,
                    None => {
                        self.counters.lu_decompositions += 1;
                        (Matrix::identity(n, n) - c * &self.jac).lu()
                    }
                };
                let outcome = self.solve_system(t_new, &y_predict, c, &psi, &factorization, &scale);
                lu = Some(factorization);
                if outcome.converged || current_jac {
                    break outcome;
                }
                match evaluate_jacobian(self.system, t_new, &y_predict, None, &mut self.counters) {
                    Ok(j) => self.jac = j,
                    Err(e) => {
                        debug!(t = t_new, error = %e, "Jacobian refresh failed");
                        break outcome;
                    }
                }
                lu = None;
                current_jac = true;
            };

            if !outcome.converged {
                self.counters.nonlinear_failures += 1;
                self.rejected_steps += 1;
                debug!(t, h = h_abs, "corrector did not converge, halving step");
                if !self.rescale(&mut h_abs, 0.5) {
                    return Err(SimError::StepTooSmall { t, h: h_abs });
                }
                lu = None;
                continue;
            }

            let safety = 0.9 * (2 * NEWTON_MAXITER + 1) as Real
                / (2 * NEWTON_MAXITER + outcome.iterations) as Real;
            let scale = error_scale(&self.atol, &self.rtol, &outcome.y);
            let error_norm = weighted_rms_norm(&(error_const * &outcome.d), &scale);

            if error_norm > 1.0 {
                let factor = MIN_FACTOR.max(safety * error_norm.powf(-1.0 / (order + 1) as Real));
                self.rejected_steps += 1;
                debug!(t, h = h_abs, error_norm, "step rejected by error test");
                if !self.rescale(&mut h_abs, factor) {
                    return Err(SimError::StepTooSmall { t, h: h_abs });
                }
                // The iteration matrix depends on the step
                lu = None;
                continue;
            }

            break (t_new, outcome.y, outcome.d, scale, error_norm, outcome.iterations);
        };

        let safety =
            0.9 * (2 * NEWTON_MAXITER + 1) as Real / (2 * NEWTON_MAXITER + iterations) as Real;

        self.n_equal_steps += 1;
        self.t = t_new;
        self.y = y_new;
        self.h_abs = h_abs;
        self.lu = lu;
        self.last_iterations = iterations;

        self.d[order + 2] = &d - &self.d[order + 1];
        self.d[order + 1] = d;
        for i in (0..=order).rev() {
            let next = self.d[i + 1].clone();
            self.d[i] += next;
        }

        if self.n_equal_steps >= order + 1 {
            self.select_order(&scale, error_norm, safety);
        }

        debug!(t = self.t, h = self.h_abs, order = self.order, iterations, "BDF step accepted");

        self.dense = Some(BdfDense {
            t_old: t,
            t: self.t,
            h: self.h_abs,
            order: self.order,
            d: self.d[..=self.order].to_vec(),
        });
        Ok(())
    }

    /// Pick the order with the largest admissible step among `order - 1`,
    /// `order` and `order + 1`, then rescale the step.
    fn select_order(&mut self, scale: &State, error_norm: Real, safety: Real) {
        let order = self.order;
        let c = &self.coeffs.error_const;

        let error_m_norm = if order > 1 {
            weighted_rms_norm(&(c[order - 1] * &self.d[order]), scale)
        } else {
            Real::INFINITY
        };
        let error_p_norm = if order < self.max_order {
            weighted_rms_norm(&(c[order + 1] * &self.d[order + 2]), scale)
        } else {
            Real::INFINITY
        };

        let norms = [error_m_norm, error_norm, error_p_norm];
        let mut best = 0;
        let mut factors = [0.0; 3];
        for (i, norm) in norms.iter().enumerate() {
            factors[i] = norm.powf(-1.0 / (order + i) as Real);
            if factors[i] > factors[best] {
                best = i;
            }
        }

        self.order = order + best - 1;
        let factor = MAX_FACTOR.min(safety * factors[best]);
        let mut h_abs = self.h_abs;
        self.rescale(&mut h_abs, factor);
        self.h_abs = h_abs;
        self.lu = None;
    }
}

/// Round a step down to a whole number of periods, never below one period.
fn round_to_period(h: Real, period: Option<Real>) -> Real {
    match period {
        Some(p) => (h / p + PERIOD_SLACK).floor().max(1.0) * p,
        None => h,
    }
}

fn clamp_rtol(rtol: &Tolerance) -> Tolerance {
    let floor = 100.0 * Real::EPSILON;
    let clamp = |v: Real| {
        if v < floor {
            warn!(rtol = v, floor, "rtol too small, raised");
            floor
        } else {
            v
        }
    };
    match rtol {
        Tolerance::Scalar(v) => Tolerance::Scalar(clamp(*v)),
        Tolerance::PerComponent(values) => {
            Tolerance::PerComponent(values.iter().copied().map(clamp).collect())
        }
    }
}

/// Analytic Jacobian when the system has one, forward differences otherwise.
fn evaluate_jacobian<S: OdeSystem + ?Sized>(
    system: &S,
    t: Real,
    y: &State,
    f: Option<&State>,
    counters: &mut StepCounters,
) -> SimResult<Matrix> {
    if let Some(j) = system.jacobian(t, y)? {
        return Ok(j);
    }
    counters.fd_jacobians += 1;
    Ok(finite_difference_jacobian(
        y,
        f,
        |v: &State| Ok(system.rhs(t, v)?),
        FORWARD_EPS,
    )?)
}

/// Initial step estimate for a first-order start.
fn select_initial_step<S: OdeSystem + ?Sized>(
    system: &S,
    t0: Real,
    y0: &State,
    f0: &State,
    t_bound: Real,
    atol: &Tolerance,
    rtol: &Tolerance,
) -> SimResult<Real> {
    let interval = t_bound - t0;
    let scale = error_scale(atol, rtol, y0);
    let d0 = weighted_rms_norm(y0, &scale);
    let d1 = weighted_rms_norm(f0, &scale);

    let h0 = if d0 < 1e-5 || d1 < 1e-5 {
        1e-6
    } else {
        0.01 * d0 / d1
    };
    let h0 = h0.min(interval);

    let y1 = y0 + h0 * f0;
    let f1 = system.rhs(t0 + h0, &y1)?;
    let d2 = weighted_rms_norm(&(f1 - f0), &scale) / h0;

    let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
        1e-6_f64.max(h0 * 1e-3)
    } else {
        (0.01 / d1.max(d2)).sqrt()
    };

    Ok((100.0 * h0).min(h1).min(interval))
}
