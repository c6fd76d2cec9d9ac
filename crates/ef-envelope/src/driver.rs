//! Envelope driver: macro stepping, period tracking, fallbacks and fine
//! reconstruction.
//!
//! The horizon `[t0, tend]` is split into a whole number of periods, which
//! the macro integrator covers, and a remainder shorter than one period,
//! which is integrated directly. The last macro sample is therefore always
//! exactly `tend`.
//!
//! A macro step spanning a single period is the exact map `Phi_T` and needs
//! no implicit solve. When an implicit macro step fails, the same interval
//! is covered by consecutive one-period maps and the macro integrator
//! restarts from the new state.
//!
//! With an estimated period the envelope measures the period at every
//! evaluation, and every macro sample records the period measured there. A
//! step over which the period changed by more than `period_tol` is redone:
//! halved when it spans more than two periods, otherwise replaced by a
//! one-period map.

use std::cell::Cell;
use std::fmt::Display;

use crate::error::{EnvelopeError, EnvelopeResult};
use crate::options::{EnvelopeOptions, MacroStepping, Reconstruction};
use crate::transform::EnvelopeSystem;
use crate::{PERIOD_SLACK, whole_periods};
use ef_core::{CoreResult, Matrix, OdeSystem, Real, State};
use ef_sim::{
    EnvelopeTrace, FixedBdf, FixedStepper, IntegrateOptions, Method, SimError, SolutionBundle,
    SolveStats, Status, StepCounters, StepGrid, Trajectory, VariableBdf, validate_problem,
};
use ef_solver::{FORWARD_EPS, SolverResult, finite_difference_jacobian, newton_solve};
use tracing::{debug, warn};

/// Follow the envelope of `system` over `span = (t0, tend)` from `y0`.
///
/// Configuration problems are returned as `Err`. Numerical failures end the
/// solve early with `Status::StepFailure`; the macro samples accepted up to
/// that point are kept.
pub fn envelope_full<S: OdeSystem + ?Sized>(
    system: &S,
    span: (Real, Real),
    y0: &State,
    opts: &EnvelopeOptions,
) -> EnvelopeResult<SolutionBundle> {
    opts.validate()?;
    validate_problem(system, span, y0, &opts.inner).map_err(|e| match e {
        SimError::InvalidConfig { what } => EnvelopeError::InvalidConfig { what },
        other => EnvelopeError::Sim(other),
    })?;

    let (t0, tend) = span;
    let mut env = EnvelopeSystem::new(system, opts.period.initial(), &opts.inner)?;
    let mut first_map = None;
    if opts.period.is_estimated() {
        env = env.tracking();
        first_map = Some(env.period_map(t0, y0)?.1);
    }

    let period = env.period();
    let n_periods = whole_periods(tend - t0, period);
    let mut macro_end = t0 + n_periods as Real * period;
    if tend - macro_end <= PERIOD_SLACK * period {
        macro_end = tend;
    }
    debug!(t0, tend, period, n_periods, tracking = env.is_tracking(), "envelope solve");

    let first = Measured {
        period,
        map: first_map,
    };
    let mut run = MacroRun::new(&env, opts, macro_end, (t0, y0), first);
    if n_periods > 0 {
        match opts.macro_stepping {
            MacroStepping::Fixed { step, order } => run.fixed(step, order)?,
            MacroStepping::Variable {
                rtol,
                atol,
                max_order,
                first_step,
                max_step,
            } => {
                let macro_opts = IntegrateOptions {
                    method: Method::BdfVariable,
                    rtol: rtol.into(),
                    atol: atol.into(),
                    order: Some(max_order),
                    period: Some(period),
                    first_step: Some(first_step.unwrap_or(period)),
                    max_step,
                    ..IntegrateOptions::default()
                };
                macro_opts
                    .validate(system.dimension())
                    .map_err(|e| EnvelopeError::config(format!("macro options: {e}")))?;
                run.variable(macro_opts)?;
            }
            MacroStepping::Trapezoidal {
                rtol,
                atol,
                max_step_periods,
            } => run.trapezoidal((rtol, atol), max_step_periods),
        }
    }
    if run.is_running() && run.t < tend {
        run.tail(tend);
    }

    let fine = match opts.reconstruct {
        Reconstruction::None => Vec::new(),
        Reconstruction::Window { periods } => run.reconstruct(periods),
    };
    Ok(run.finish(fine))
}

/// Period at a candidate sample, with the fast state one period later when
/// it was measured.
struct Measured {
    period: Real,
    map: Option<State>,
}

/// Why a variable-step macro solver stopped short of its end time.
enum Restart {
    Failed(SimError),
    /// The period changed too much over a step of this many periods
    PeriodJump(usize),
}

/// Envelope slope at a sample and the one-period map it came from.
struct Slope {
    map: State,
    slope: State,
}

/// Macro samples and bookkeeping of one envelope solve.
struct MacroRun<'e, 'a, S: OdeSystem + ?Sized> {
    env: &'e EnvelopeSystem<'a, S>,
    opts: &'e EnvelopeOptions,
    /// End of the whole periods covered by macro steps
    macro_end: Real,
    samples: Trajectory,
    /// Period at each sample
    periods: Vec<Real>,
    /// One-period map of the current sample, when already evaluated
    next_map: Option<State>,
    t: Real,
    y: State,
    stats: SolveStats,
    status: Status,
    fallbacks: usize,
}

impl<'e, 'a, S: OdeSystem + ?Sized> MacroRun<'e, 'a, S> {
    fn new(
        env: &'e EnvelopeSystem<'a, S>,
        opts: &'e EnvelopeOptions,
        macro_end: Real,
        (t0, y0): (Real, &State),
        first: Measured,
    ) -> Self {
        Self {
            env,
            opts,
            macro_end,
            samples: Trajectory::starting_at(t0, y0.clone()),
            periods: vec![first.period],
            next_map: first.map,
            t: t0,
            y: y0.clone(),
            stats: SolveStats::default(),
            status: Status::Success,
            fallbacks: 0,
        }
    }

    fn is_running(&self) -> bool {
        self.status == Status::Success
    }

    /// Period at the current sample.
    fn period(&self) -> Real {
        self.periods
            .last()
            .copied()
            .unwrap_or_else(|| self.env.period())
    }

    /// Time left for macro steps, rounding noise counted as none.
    fn macro_left(&self) -> Real {
        let left = self.macro_end - self.t;
        if left <= PERIOD_SLACK * self.period() {
            0.0
        } else {
            left
        }
    }

    /// Period at a candidate sample: measured when tracking, otherwise the
    /// known one. `None` when the measurement failed and the solve stopped.
    fn measure(&mut self, t: Real, y: &State) -> Option<Measured> {
        if !self.env.is_tracking() {
            return Some(Measured {
                period: self.env.period(),
                map: None,
            });
        }
        match self.env.period_map(t, y) {
            Ok((period, map)) => Some(Measured {
                period,
                map: Some(map),
            }),
            Err(e) => {
                self.fail(format!("period measurement at t={t} failed: {e}"));
                None
            }
        }
    }

    /// Whether the period moved by more than `period_tol` from the current
    /// sample to a candidate.
    fn jumped(&self, measured: &Measured) -> bool {
        self.env.is_tracking() && (measured.period - self.period()).abs() > self.opts.period_tol
    }

    fn accept(&mut self, t: Real, y: State, measured: Measured) {
        self.stats.steps += 1;
        self.samples.push(t, y.clone());
        self.periods.push(measured.period);
        self.next_map = measured.map;
        self.t = t;
        self.y = y;
    }

    fn fail(&mut self, reason: String) {
        warn!(t = self.t, %reason, "envelope solve stopped");
        self.status = Status::StepFailure { t: self.t, reason };
    }

    fn step_budget_left(&mut self) -> bool {
        if self.stats.steps >= self.opts.max_macro_steps {
            self.fail(format!(
                "maximum number of macro steps ({}) reached",
                self.opts.max_macro_steps
            ));
            return false;
        }
        true
    }

    fn add_counters(&mut self, counters: StepCounters) {
        self.stats.fd_jacobians += counters.fd_jacobians;
        self.stats.lu_decompositions += counters.lu_decompositions;
        self.stats.nonlinear_failures += counters.nonlinear_failures;
    }

    /// Replace the failed macro step to `t_next` by one-period maps.
    fn fallback(&mut self, t_next: Real, error: &impl Display) -> bool {
        self.stats.rejected_steps += 1;
        if self.opts.max_fallbacks.is_some_and(|max| self.fallbacks >= max) {
            self.fail(format!(
                "macro step to t={t_next} failed and no fallbacks remain: {error}"
            ));
            return false;
        }
        warn!(t = self.t, t_next, %error, "macro step failed, using one-period maps");
        self.fallbacks += 1;

        let y = match self.cover(t_next) {
            Ok(y) => y,
            Err(e) => {
                self.fail(format!("one-period map after t={} failed: {e}", self.t));
                return false;
            }
        };
        let Some(measured) = self.measure(t_next, &y) else {
            return false;
        };
        self.accept(t_next, y, measured);
        true
    }

    /// Fast state at `t_next`: one-period maps while a whole period fits,
    /// then direct integration over what is left.
    fn cover(&mut self, t_next: Real) -> CoreResult<State> {
        let mut t = self.t;
        let mut y = self.y.clone();
        let mut pending = self.next_map.take().map(|map| (self.period(), map));
        loop {
            let expected = pending.as_ref().map_or(self.env.period(), |(p, _)| *p);
            if t + expected > t_next + PERIOD_SLACK * expected {
                break;
            }
            let (period, map) = match pending.take() {
                Some(known) => known,
                None => self.env.period_map(t, &y)?,
            };
            if t + period > t_next + PERIOD_SLACK * period {
                break;
            }
            t += period;
            y = map;
        }
        if t_next - t > PERIOD_SLACK * self.period() {
            y = self.env.advance_to(t, &y, t_next)?;
        }
        Ok(y)
    }

    /// Advance the current sample by one period with the exact map.
    fn one_period(&mut self) -> bool {
        let (period, map) = match self.next_map.take() {
            Some(map) => (self.period(), map),
            None => match self.env.period_map(self.t, &self.y) {
                Ok(known) => known,
                Err(e) => {
                    self.fail(format!("one-period map from t={} failed: {e}", self.t));
                    return false;
                }
            },
        };
        let mut t_next = self.t + period;
        if (self.macro_end - t_next).abs() <= PERIOD_SLACK * period {
            t_next = self.macro_end;
        }
        let Some(measured) = self.measure(t_next, &map) else {
            return false;
        };
        self.accept(t_next, map, measured);
        true
    }

    /// Fixed-step BDF on the grid `t0 + n H` up to the end of the whole
    /// periods. A step redone after a period jump restarts the grid there.
    fn fixed(&mut self, step: Real, order: usize) -> EnvelopeResult<()> {
        let period = self.period();
        let per_step = whole_periods(step, period).max(1);
        let h = per_step as Real * period;
        if (h - step).abs() > PERIOD_SLACK * step {
            warn!(step, h, "macro step rounded to a whole number of periods");
        }

        let mut stepper = FixedBdf::new(order)
            .map_err(|e| EnvelopeError::config(e.to_string()))?
            .with_nonlinear(self.opts.nonlinear)
            .with_newton(self.opts.newton.clone())
            .with_fixed_point(self.opts.fixed_point.clone());
        let mut grid_h = h;
        let mut grid = StepGrid::new(self.t, self.macro_end, grid_h);
        let mut i = 0;

        while self.is_running() && i < grid.steps() && self.macro_left() > 0.0 {
            if !self.step_budget_left() {
                break;
            }
            let t_next = grid.time(i + 1);
            i += 1;
            let periods = ((t_next - self.t) / self.period()).round() as usize;

            if periods == 1 && !self.env.is_tracking() {
                stepper.restart();
                match self.env.advance_one_period(self.t, &self.y) {
                    Ok(y) => {
                        let measured = Measured {
                            period: self.env.period(),
                            map: None,
                        };
                        self.accept(t_next, y, measured);
                    }
                    Err(e) => {
                        self.fail(format!("one-period map failed: {e}"));
                        break;
                    }
                }
                continue;
            }

            let report = match stepper.step(self.env, self.t, &self.y, t_next - self.t) {
                Ok(report) => report,
                Err(e) => {
                    stepper.restart();
                    if !self.fallback(t_next, &e) {
                        break;
                    }
                    continue;
                }
            };
            self.stats
                .record_iterations(report.iterations, self.opts.inner.slow_iteration_threshold);
            let Some(measured) = self.measure(t_next, &report.y) else {
                break;
            };

            if periods > 1 && self.jumped(&measured) {
                self.stats.rejected_steps += 1;
                stepper.restart();
                debug!(
                    t = self.t,
                    periods,
                    from = self.period(),
                    to = measured.period,
                    "period changed too much over the macro step"
                );
                if periods > 2 {
                    grid_h = (periods / 2) as Real * self.period();
                } else if !self.one_period() {
                    break;
                }
                grid = StepGrid::new(self.t, self.macro_end, grid_h);
                i = 0;
                continue;
            }

            debug!(t = t_next, iterations = report.iterations, "macro step accepted");
            self.accept(t_next, report.y, measured);
            if grid_h != h {
                grid_h = h;
                grid = StepGrid::new(self.t, self.macro_end, grid_h);
                i = 0;
            }
        }

        self.add_counters(stepper.counters());
        Ok(())
    }

    /// Variable-step BDF with period-aligned steps up to the end of the
    /// whole periods.
    fn variable(&mut self, mut macro_opts: IntegrateOptions) -> EnvelopeResult<()> {
        while self.is_running() && self.macro_left() > 0.0 {
            let restart = match VariableBdf::new(
                self.env,
                self.t,
                self.y.clone(),
                self.macro_end,
                &macro_opts,
            ) {
                Ok(mut solver) => {
                    let restart = self.run_variable(&mut solver);
                    self.stats.rejected_steps += solver.rejected_steps();
                    self.add_counters(solver.counters());
                    restart
                }
                Err(e @ SimError::InvalidConfig { .. }) => {
                    return Err(EnvelopeError::config(e.to_string()));
                }
                Err(e) => Some(Restart::Failed(e)),
            };
            let Some(restart) = restart else {
                break;
            };
            if !self.is_running() {
                break;
            }

            let first_step = match restart {
                Restart::Failed(error) => {
                    let mut t_next = self.t + self.period();
                    if self.macro_end - t_next <= PERIOD_SLACK * self.period() {
                        t_next = self.macro_end;
                    }
                    if !self.fallback(t_next, &error) {
                        break;
                    }
                    self.period()
                }
                Restart::PeriodJump(periods) if periods > 2 => {
                    (periods / 2) as Real * self.period()
                }
                Restart::PeriodJump(_) => {
                    if !self.one_period() {
                        break;
                    }
                    self.period()
                }
            };
            macro_opts.first_step = Some(first_step);
        }
        Ok(())
    }

    /// Step `solver` to its end time; `None` once there or when the solve
    /// stopped.
    fn run_variable(
        &mut self,
        solver: &mut VariableBdf<'_, EnvelopeSystem<'a, S>>,
    ) -> Option<Restart> {
        while !solver.is_finished() {
            if !self.step_budget_left() {
                return None;
            }
            if let Err(e) = solver.step() {
                return Some(Restart::Failed(e));
            }
            self.stats.record_iterations(
                solver.last_iterations(),
                self.opts.inner.slow_iteration_threshold,
            );
            let (t_next, y_next) = (solver.t(), solver.y().clone());
            let measured = self.measure(t_next, &y_next)?;

            let periods = ((t_next - self.t) / self.period()).round() as usize;
            if periods > 1 && self.jumped(&measured) {
                self.stats.rejected_steps += 1;
                debug!(
                    t = self.t,
                    periods,
                    from = self.period(),
                    to = measured.period,
                    "period changed too much over the macro step"
                );
                return Some(Restart::PeriodJump(periods));
            }
            debug!(
                t = t_next,
                h = solver.step_size(),
                order = solver.order(),
                "macro step accepted"
            );
            self.accept(t_next, y_next, measured);
        }
        None
    }

    /// Trapezoidal rule on the envelope. Every accepted step proposes the
    /// next as the most whole periods its error estimate admits; a step of
    /// one period is the exact map.
    fn trapezoidal(&mut self, tolerances: (Real, Real), max_step_periods: usize) {
        let Some(mut here) = self.slope_here() else {
            return;
        };
        let mut gradient = State::zeros(self.y.len());
        let mut periods = 1;

        while self.is_running() {
            let left = whole_periods(self.macro_left(), self.period());
            if left == 0 || !self.step_budget_left() {
                break;
            }
            let n = periods.min(left);

            let (t_next, y_next) = if n == 1 {
                let mut t_next = self.t + self.period();
                if (self.macro_end - t_next).abs() <= PERIOD_SLACK * self.period() {
                    t_next = self.macro_end;
                }
                (t_next, here.map.clone())
            } else {
                let t_next = if n == left {
                    self.macro_end
                } else {
                    self.t + n as Real * self.period()
                };
                match self.trapezoid_stage(t_next, &here.slope) {
                    Ok(y) => (t_next, y),
                    Err(e) => {
                        self.stats.nonlinear_failures += 1;
                        if !self.fallback(t_next, &e) {
                            break;
                        }
                        match self.slope_here() {
                            Some(slope) => here = slope,
                            None => break,
                        }
                        gradient.fill(0.0);
                        periods = 1;
                        continue;
                    }
                }
            };

            let Some(mut measured) = self.measure(t_next, &y_next) else {
                break;
            };
            if n > 1 && self.jumped(&measured) {
                self.stats.rejected_steps += 1;
                debug!(
                    t = self.t,
                    periods = n,
                    from = self.period(),
                    to = measured.period,
                    "period changed too much over the macro step"
                );
                periods = if n > 2 { n / 2 } else { 1 };
                continue;
            }

            let Some(next) = self.slope_of(t_next, &y_next, &mut measured) else {
                break;
            };
            let estimate = TrapezoidError::new(
                (&self.y, &y_next),
                (&here.slope, &next.slope),
                &gradient,
                t_next - self.t,
                tolerances,
            );
            let fit = estimate
                .admissible_periods(measured.period)
                .min(max_step_periods);
            if n > 1 && !estimate.within_tolerance() {
                self.stats.rejected_steps += 1;
                debug!(t = self.t, periods = n, fit, "trapezoidal step rejected by error test");
                periods = fit.clamp(1, n - 1);
                continue;
            }

            debug!(t = t_next, periods = n, next = fit, "macro step accepted");
            self.accept(t_next, y_next, measured);
            here = next;
            gradient = estimate.gradient;
            periods = fit.max(1);
        }
    }

    /// Solve `Y - y - H/2 (G(t, y) + G(t + H, Y)) = 0` from the explicit
    /// Euler predictor, with a difference Jacobian frozen at the predictor.
    fn trapezoid_stage(&mut self, t_next: Real, slope: &State) -> SolverResult<State> {
        let env = self.env;
        let h = t_next - self.t;
        let c = 0.5 * h;
        let psi = &self.y + c * slope;
        let predictor = &self.y + h * slope;
        let n = predictor.len();

        let j = finite_difference_jacobian(
            &predictor,
            None,
            |x: &State| Ok(env.rhs(t_next, x)?),
            FORWARD_EPS,
        )?;
        self.stats.fd_jacobians += 1;
        let iteration = Matrix::identity(n, n) - c * j;
        let uses = Cell::new(0usize);
        let result = newton_solve(
            predictor,
            |x: &State| -> SolverResult<State> {
                let g = env.rhs(t_next, x)?;
                Ok(x - &psi - c * g)
            },
            |_x: &State| -> SolverResult<Matrix> {
                uses.set(uses.get() + 1);
                Ok(iteration.clone())
            },
            &self.opts.newton,
        );
        self.stats.lu_decompositions += uses.get();

        let result = result?;
        self.stats
            .record_iterations(result.iterations, self.opts.inner.slow_iteration_threshold);
        Ok(result.x)
    }

    /// Envelope slope at the current sample.
    fn slope_here(&mut self) -> Option<Slope> {
        let map = match self.next_map.clone() {
            Some(map) => map,
            None => match self.env.period_map(self.t, &self.y) {
                Ok((_, map)) => {
                    self.next_map = Some(map.clone());
                    map
                }
                Err(e) => {
                    self.fail(format!("envelope slope at t={} failed: {e}", self.t));
                    return None;
                }
            },
        };
        let slope = (&map - &self.y) / self.period();
        Some(Slope { map, slope })
    }

    /// Envelope slope at a candidate sample; the map lands in `measured`.
    fn slope_of(&mut self, t: Real, y: &State, measured: &mut Measured) -> Option<Slope> {
        let map = match measured.map.clone() {
            Some(map) => map,
            None => match self.env.period_map(t, y) {
                Ok((_, map)) => {
                    measured.map = Some(map.clone());
                    map
                }
                Err(e) => {
                    self.fail(format!("envelope slope at t={t} failed: {e}"));
                    return None;
                }
            },
        };
        let slope = (&map - y) / measured.period;
        Some(Slope { map, slope })
    }

    /// Integrate the remainder shorter than one period directly.
    fn tail(&mut self, tend: Real) {
        match self.env.advance_to(self.t, &self.y, tend) {
            Ok(y) => {
                let measured = Measured {
                    period: self.period(),
                    map: None,
                };
                self.accept(tend, y, measured);
            }
            Err(e) => self.fail(format!("final partial period failed: {e}")),
        }
    }

    /// Fine windows of `periods` periods starting at every macro sample.
    fn reconstruct(&mut self, periods: usize) -> Vec<Trajectory> {
        let Some(t_last) = self.samples.final_time() else {
            return Vec::new();
        };
        let mut windows = Vec::with_capacity(self.samples.len());

        for i in 0..self.samples.len() {
            let t_i = self.samples.t[i];
            if t_i >= t_last {
                break;
            }
            let end = (t_i + periods as Real * self.periods[i]).min(t_last);
            match self.env.fine_trajectory(t_i, &self.samples.y[i], end) {
                Ok(window) => windows.push(window),
                Err(e) => {
                    if self.is_running() {
                        self.fail(format!("reconstruction from t={t_i} failed: {e}"));
                    }
                    break;
                }
            }
        }
        windows
    }

    fn finish(self, fine: Vec<Trajectory>) -> SolutionBundle {
        let inner = self.env.inner_stats();
        let mut stats = self.stats;
        stats.rhs_evals = inner.rhs_evals;
        stats.jacobian_evals = inner.jacobian_evals;
        stats.period_evaluations = inner.period_evaluations;
        stats.period_estimates = inner.period_estimates;
        stats.t_final = self.t;

        debug!(
            steps = stats.steps,
            rejected = stats.rejected_steps,
            period_evaluations = stats.period_evaluations,
            period_estimates = stats.period_estimates,
            fallbacks = self.fallbacks,
            status = ?self.status,
            "envelope solve finished"
        );

        let envelope = EnvelopeTrace {
            period: self.periods.first().copied().unwrap_or_else(|| self.env.period()),
            t: self.samples.t.clone(),
            z: self.samples.y.clone(),
            periods: self.periods,
            fine,
            fallback_steps: self.fallbacks,
        };
        SolutionBundle {
            trajectory: self.samples,
            events: Vec::new(),
            envelope: Some(envelope),
            status: self.status,
            stats,
        }
    }
}

/// Local error estimate `H^3 / 12 |z'''|` of a trapezoidal envelope step.
///
/// `z''' = f (f f'' + f'^2)` per component, with `f'` and `f''` divided
/// differences of the envelope slope `f` against the state.
struct TrapezoidError {
    /// `f'` at the new sample, carried into the next step
    gradient: State,
    third: State,
    scale: State,
    h: Real,
}

impl TrapezoidError {
    fn new(
        (y, y_next): (&State, &State),
        (slope, slope_next): (&State, &State),
        gradient: &State,
        h: Real,
        (rtol, atol): (Real, Real),
    ) -> Self {
        let dy = y_next - y;
        let gradient_next = divided(&(slope_next - slope), &dy);
        let second = divided(&(&gradient_next - gradient), &dy);
        let curvature =
            slope_next.component_mul(&second) + gradient_next.component_mul(&gradient_next);
        let mut third = slope_next.component_mul(&curvature).abs();

        // Components without an estimate take the smallest one available
        let floor = third
            .iter()
            .copied()
            .filter(|v| *v > 0.0)
            .fold(Real::INFINITY, Real::min);
        if floor.is_finite() {
            third.iter_mut().filter(|v| **v == 0.0).for_each(|v| *v = floor);
        }
        let scale = y_next.map(|v| atol + rtol * v.abs());
        Self {
            gradient: gradient_next,
            third,
            scale,
            h,
        }
    }

    fn within_tolerance(&self) -> bool {
        let k = self.h.powi(3) / 12.0;
        self.third
            .iter()
            .zip(self.scale.iter())
            .all(|(z3, sc)| k * z3 <= *sc)
    }

    /// Longest step, in whole periods, whose estimate stays within tolerance.
    fn admissible_periods(&self, period: Real) -> usize {
        let h = self
            .third
            .iter()
            .zip(self.scale.iter())
            .filter(|(z3, _)| **z3 > 0.0)
            .map(|(z3, sc)| (12.0 * sc / z3).cbrt())
            .fold(Real::INFINITY, Real::min);
        if h.is_finite() {
            (h / period).floor().max(0.0) as usize
        } else {
            usize::MAX
        }
    }
}

/// Componentwise `num / den`, zero where the quotient is not finite.
fn divided(num: &State, den: &State) -> State {
    num.zip_map(den, |a, b| {
        let q = a / b;
        if q.is_finite() { q } else { 0.0 }
    })
}
