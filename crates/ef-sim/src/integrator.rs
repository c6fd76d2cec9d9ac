//! Fixed-step time integrators and the uniform step grid.

use crate::error::SimResult;
use ef_core::{OdeSystem, Real, State};

/// Work done by one fixed step.
#[derive(Clone, Debug)]
pub struct StepReport {
    /// State at the end of the step
    pub y: State,
    /// Nonlinear iterations used (zero for explicit steps)
    pub iterations: usize,
}

/// Counters accumulated by a stepper over its lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepCounters {
    pub fd_jacobians: usize,
    pub lu_decompositions: usize,
    pub nonlinear_failures: usize,
}

/// Trait for fixed-step integrators.
pub trait FixedStepper {
    /// Advance `y` at time `t` by one step of length `h`.
    ///
    /// `y` must be the state returned by the previous call (or the initial
    /// state); multistep methods keep their own history of earlier steps.
    fn step<S: OdeSystem + ?Sized>(
        &mut self,
        system: &S,
        t: Real,
        y: &State,
        h: Real,
    ) -> SimResult<StepReport>;

    /// Forget any step history; the next step starts from scratch.
    fn restart(&mut self) {}

    fn counters(&self) -> StepCounters {
        StepCounters::default()
    }
}

/// Forward Euler (explicit, 1st order).
///
/// No stability control at all: on stiff problems with `h |lambda| > 2` the
/// iterates grow without bound, which is the expected behaviour.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForwardEuler;

impl FixedStepper for ForwardEuler {
    fn step<S: OdeSystem + ?Sized>(
        &mut self,
        system: &S,
        t: Real,
        y: &State,
        h: Real,
    ) -> SimResult<StepReport> {
        let ydot = system.rhs(t, y)?;
        Ok(StepReport {
            y: y + h * ydot,
            iterations: 0,
        })
    }
}

/// Uniform grid `t0 + n h` on `[t0, tend]` whose last point is exactly `tend`.
///
/// Grid times are computed by multiplication, never by repeated addition, so
/// the `n`-th point carries a single rounding error however long the run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepGrid {
    t0: Real,
    tend: Real,
    h: Real,
    steps: usize,
}

impl StepGrid {
    /// Relative slack under which `span / h` counts as a whole number.
    const WHOLE_TOL: Real = 1e-9;

    pub fn new(t0: Real, tend: Real, h: Real) -> Self {
        let ratio = (tend - t0) / h;
        let rounded = ratio.round();
        let steps = if (ratio - rounded).abs() <= Self::WHOLE_TOL * rounded.max(1.0) {
            rounded
        } else {
            ratio.ceil()
        };
        Self {
            t0,
            tend,
            h,
            steps: (steps as usize).max(1),
        }
    }

    /// Number of steps.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Time of grid point `i` (`0..=steps`).
    pub fn time(&self, i: usize) -> Real {
        if i >= self.steps {
            self.tend
        } else {
            self.t0 + i as Real * self.h
        }
    }

    /// Whether the last step is shorter than `h`.
    pub fn last_is_clipped(&self) -> bool {
        let last = self.time(self.steps) - self.time(self.steps - 1);
        (last - self.h).abs() > Self::WHOLE_TOL * self.h
    }
}
