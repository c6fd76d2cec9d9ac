//! Integration entry points and result recording.

use crate::bdf::FixedBdf;
use crate::counted::Counted;
use crate::error::{SimError, SimResult};
use crate::events::{Event, EventTracker};
use crate::integrator::{FixedStepper, ForwardEuler, StepGrid};
use crate::options::{IntegrateOptions, Method};
use crate::solution::{SolutionBundle, SolveStats, Status, Trajectory};
use crate::variable_bdf::VariableBdf;
use ef_core::{OdeSystem, Real, State, ensure_finite_state};
use tracing::{debug, warn};

/// Integrate `system` over `span = (t0, tend)` from `y0`.
///
/// Configuration problems are returned as `Err` before any stepping.
/// Numerical failures end the solve early with `Status::StepFailure` and the
/// accepted part of the trajectory.
pub fn integrate<S: OdeSystem + ?Sized>(
    system: &S,
    span: (Real, Real),
    y0: &State,
    opts: &IntegrateOptions,
) -> SimResult<SolutionBundle> {
    integrate_with_events(system, span, y0, opts, &[])
}

/// `integrate` with zero-crossing events.
pub fn integrate_with_events<S: OdeSystem + ?Sized>(
    system: &S,
    span: (Real, Real),
    y0: &State,
    opts: &IntegrateOptions,
    events: &[Event<'_>],
) -> SimResult<SolutionBundle> {
    validate_problem(system, span, y0, opts)?;

    let counted = Counted::new(system);
    let mut tracker = EventTracker::new(events, span.0, y0);

    let mut bundle = match opts.method {
        Method::ExplicitEuler => run_fixed(&counted, ForwardEuler, span, y0, opts, &mut tracker),
        Method::BdfFixed => {
            let stepper = FixedBdf::new(opts.resolved_order())?
                .with_nonlinear(opts.nonlinear)
                .with_newton(opts.newton.clone())
                .with_fixed_point(opts.fixed_point.clone());
            run_fixed(&counted, stepper, span, y0, opts, &mut tracker)
        }
        Method::BdfVariable => run_variable(&counted, span, y0, opts, &mut tracker)?,
    };

    bundle.stats.rhs_evals = counted.rhs_evals();
    bundle.stats.jacobian_evals = counted.jacobian_evals();
    bundle.stats.t_final = bundle.trajectory.final_time().unwrap_or(span.0);

    debug!(
        method = ?opts.method,
        steps = bundle.stats.steps,
        rejected = bundle.stats.rejected_steps,
        rhs_evals = bundle.stats.rhs_evals,
        status = ?bundle.status,
        "integration finished"
    );
    Ok(bundle)
}

/// Reject inconsistent problems before any stepping.
pub fn validate_problem<S: OdeSystem + ?Sized>(
    system: &S,
    span: (Real, Real),
    y0: &State,
    opts: &IntegrateOptions,
) -> SimResult<()> {
    let (t0, tend) = span;
    if !t0.is_finite() || !tend.is_finite() {
        return Err(SimError::config("time span must be finite"));
    }
    if tend <= t0 {
        return Err(SimError::config(format!(
            "end time {tend} must be after start time {t0}"
        )));
    }
    let dim = system.dimension();
    if y0.len() != dim {
        return Err(SimError::config(format!(
            "initial state has {} components, system has {dim}",
            y0.len()
        )));
    }
    ensure_finite_state(y0, "initial state").map_err(|e| SimError::config(e.to_string()))?;
    opts.validate(dim)?;

    if system.has_jacobian() {
        match system.jacobian(t0, y0) {
            Ok(Some(j)) if j.nrows() == dim && j.ncols() == dim => {}
            Ok(Some(j)) => {
                return Err(SimError::config(format!(
                    "Jacobian is {}x{}, expected {dim}x{dim}",
                    j.nrows(),
                    j.ncols()
                )));
            }
            Ok(None) => {}
            Err(e) => return Err(SimError::config(e.to_string())),
        }
    }
    Ok(())
}

/// Records accepted steps with decimation.
struct Recorder {
    trajectory: Trajectory,
    record_every: usize,
    since_record: usize,
}

impl Recorder {
    fn new(t0: Real, y0: &State, record_every: usize) -> Self {
        Self {
            trajectory: Trajectory::starting_at(t0, y0.clone()),
            record_every,
            since_record: 0,
        }
    }

    fn accept(&mut self, t: Real, y: &State) {
        self.since_record += 1;
        if self.since_record >= self.record_every {
            self.trajectory.push(t, y.clone());
            self.since_record = 0;
        }
    }

    /// Make sure the last accepted state is the final sample.
    fn finish(mut self, t: Real, y: &State) -> Trajectory {
        if self.trajectory.final_time() != Some(t) {
            self.trajectory.push(t, y.clone());
        }
        self.trajectory
    }
}

/// Fixed-step loop on the grid `t0 + n h` with a clipped final step.
fn run_fixed<S, St>(
    system: &S,
    mut stepper: St,
    span: (Real, Real),
    y0: &State,
    opts: &IntegrateOptions,
    tracker: &mut EventTracker<'_, '_>,
) -> SolutionBundle
where
    S: OdeSystem + ?Sized,
    St: FixedStepper,
{
    let (t0, tend) = span;
    let h = opts.step.unwrap_or(tend - t0);
    let grid = StepGrid::new(t0, tend, h);

    let mut recorder = Recorder::new(t0, y0, opts.record_every);
    let mut stats = SolveStats::default();
    let mut events = Vec::new();
    let mut status = Status::Success;
    let mut t = t0;
    let mut y = y0.clone();

    for i in 0..grid.steps() {
        if stats.steps >= opts.max_steps {
            status = Status::StepFailure {
                t,
                reason: format!("maximum number of steps ({}) reached", opts.max_steps),
            };
            break;
        }

        let t_next = grid.time(i + 1);
        let report = match stepper.step(system, t, &y, t_next - t) {
            Ok(report) => report,
            Err(e) => {
                warn!(t, t_next, error = %e, "fixed step failed");
                stats.rejected_steps += 1;
                status = Status::StepFailure {
                    t,
                    reason: e.to_string(),
                };
                break;
            }
        };
        stats.steps += 1;
        stats.record_iterations(report.iterations, opts.slow_iteration_threshold);

        if !tracker.is_empty() {
            let (t_old, y_old) = (t, &y);
            let y_new = &report.y;
            let interp = |s: Real| -> State {
                let w = (s - t_old) / (t_next - t_old);
                (1.0 - w) * y_old + w * y_new
            };
            let found = tracker.check(t_old, t_next, y_new, &interp);
            events.extend(found.records);
            if let Some((index, t_event)) = found.terminal {
                let y_event = interp(t_event);
                recorder.trajectory.truncate_after(t_event);
                t = t_event;
                y = y_event;
                status = Status::EventTerminated { index, t: t_event };
                break;
            }
        }

        t = t_next;
        y = report.y;
        recorder.accept(t, &y);
    }

    let counters = stepper.counters();
    stats.fd_jacobians = counters.fd_jacobians;
    stats.lu_decompositions = counters.lu_decompositions;
    stats.nonlinear_failures = counters.nonlinear_failures;

    SolutionBundle {
        trajectory: recorder.finish(t, &y),
        events,
        envelope: None,
        status,
        stats,
    }
}

/// Adaptive loop driving `VariableBdf` to `tend`.
fn run_variable<S: OdeSystem + ?Sized>(
    system: &S,
    span: (Real, Real),
    y0: &State,
    opts: &IntegrateOptions,
    tracker: &mut EventTracker<'_, '_>,
) -> SimResult<SolutionBundle> {
    let (t0, tend) = span;
    let mut solver = match VariableBdf::new(system, t0, y0.clone(), tend, opts) {
        Ok(solver) => solver,
        Err(e @ SimError::InvalidConfig { .. }) => return Err(e),
        Err(e) => {
            warn!(t = t0, error = %e, "variable BDF could not start");
            return Ok(SolutionBundle {
                trajectory: Trajectory::starting_at(t0, y0.clone()),
                status: Status::StepFailure {
                    t: t0,
                    reason: e.to_string(),
                },
                ..SolutionBundle::default()
            });
        }
    };

    let mut recorder = Recorder::new(t0, y0, opts.record_every);
    let mut stats = SolveStats::default();
    let mut events = Vec::new();
    let mut status = Status::Success;
    let mut t_end = t0;
    let mut y_end = y0.clone();

    while !solver.is_finished() {
        if stats.steps >= opts.max_steps {
            status = Status::StepFailure {
                t: solver.t(),
                reason: format!("maximum number of steps ({}) reached", opts.max_steps),
            };
            break;
        }

        let t_old = solver.t();
        if let Err(e) = solver.step() {
            warn!(t = t_old, error = %e, "variable BDF step failed");
            status = Status::StepFailure {
                t: t_old,
                reason: e.to_string(),
            };
            break;
        }
        stats.steps += 1;
        stats.record_iterations(solver.last_iterations(), opts.slow_iteration_threshold);
        t_end = solver.t();
        y_end = solver.y().clone();

        if !tracker.is_empty() {
            if let Some(dense) = solver.dense() {
                let found = tracker.check(t_old, t_end, &y_end, |s| dense.eval(s));
                events.extend(found.records);
                if let Some((index, t_event)) = found.terminal {
                    y_end = dense.eval(t_event);
                    t_end = t_event;
                    recorder.trajectory.truncate_after(t_event);
                    status = Status::EventTerminated { index, t: t_event };
                    break;
                }
            }
        }

        recorder.accept(t_end, &y_end);
    }

    let counters = solver.counters();
    stats.rejected_steps = solver.rejected_steps();
    stats.fd_jacobians = counters.fd_jacobians;
    stats.lu_decompositions = counters.lu_decompositions;
    stats.nonlinear_failures = counters.nonlinear_failures;

    Ok(SolutionBundle {
        trajectory: recorder.finish(t_end, &y_end),
        events,
        envelope: None,
        status,
        stats,
    })
}
