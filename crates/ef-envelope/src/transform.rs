//! The envelope transform `G(t, y) = (Phi_T(t, y) - y) / T`.

use std::cell::Cell;

use crate::error::{EnvelopeError, EnvelopeResult};
use crate::period::measure_period;
use ef_core::{CoreError, CoreResult, OdeSystem, Real, State, ensure_finite_state};
use ef_sim::{IntegrateOptions, SolutionBundle, Status, Trajectory, integrate};
use tracing::debug;

/// Work done by the nested fast integrations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InnerStats {
    /// One-period maps evaluated
    pub period_evaluations: usize,
    /// Period measurements
    pub period_estimates: usize,
    /// Fast right-hand side evaluations
    pub rhs_evals: usize,
    /// Fast analytic Jacobian evaluations
    pub jacobian_evals: usize,
}

/// Envelope of a fast system with period `T`.
///
/// Every `rhs` call integrates the fast system over one period from `(t, y)`
/// with a fresh integrator, so repeated evaluations (Newton iterations,
/// rejected steps) are independent of each other.
///
/// A tracking envelope measures `T` at every evaluation and ends the map on
/// the return to the hyperplane through `y` orthogonal to `F(t, y)`, so `G`
/// carries no drift along the orbit when the period depends on the state.
pub struct EnvelopeSystem<'a, S: OdeSystem + ?Sized> {
    fast: &'a S,
    /// Known period, or the latest measurement when tracking
    period: Cell<Real>,
    tracking: bool,
    /// Options for the one-period maps; intermediate samples are not kept
    map_options: IntegrateOptions,
    /// Options for fine trajectories; every step is kept
    trace_options: IntegrateOptions,
    stats: Cell<InnerStats>,
}

impl<'a, S: OdeSystem + ?Sized> EnvelopeSystem<'a, S> {
    pub fn new(fast: &'a S, period: Real, inner: &IntegrateOptions) -> EnvelopeResult<Self> {
        if !(period.is_finite() && period > 0.0) {
            return Err(EnvelopeError::config(format!(
                "period must be positive, got {period}"
            )));
        }
        inner
            .validate(fast.dimension())
            .map_err(|e| EnvelopeError::config(format!("inner options: {e}")))?;

        let map_options = IntegrateOptions {
            record_every: usize::MAX,
            ..inner.clone()
        };
        let trace_options = IntegrateOptions {
            record_every: 1,
            ..inner.clone()
        };
        Ok(Self {
            fast,
            period: Cell::new(period),
            tracking: false,
            map_options,
            trace_options,
            stats: Cell::new(InnerStats::default()),
        })
    }

    /// Measure the period at every evaluation; the period given to `new`
    /// is the first guess.
    pub fn tracking(self) -> Self {
        Self {
            tracking: true,
            ..self
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// The known period, or the latest measurement.
    pub fn period(&self) -> Real {
        self.period.get()
    }

    pub fn fast(&self) -> &'a S {
        self.fast
    }

    pub fn inner_stats(&self) -> InnerStats {
        self.stats.get()
    }

    /// One period from `(t, y)`: the period and the fast state it ends in.
    pub fn period_map(&self, t: Real, y: &State) -> CoreResult<(Real, State)> {
        if !self.tracking {
            let period = self.period();
            return Ok((period, self.map_over(t, y, period)?));
        }

        let m = measure_period(self.fast, t, y, self.period(), &self.map_options)?;
        self.update(|stats| {
            stats.period_estimates += 1;
            stats.rhs_evals += m.rhs_evals;
            stats.jacobian_evals += m.jacobian_evals;
        });
        self.period.set(m.period);
        let end = match m.closing {
            Some(state) => {
                self.update(|stats| stats.period_evaluations += 1);
                ensure_finite_state(&state, "period map")?;
                state
            }
            None => self.map_over(t, y, m.period)?,
        };
        Ok((m.period, end))
    }

    /// `Phi_T(t, y)`: the fast state one period after `(t, y)`.
    pub fn advance_one_period(&self, t: Real, y: &State) -> CoreResult<State> {
        Ok(self.period_map(t, y)?.1)
    }

    fn map_over(&self, t: Real, y: &State, period: Real) -> CoreResult<State> {
        let bundle = self.run_fast(t, t + period, y, &self.map_options)?;
        self.update(|stats| stats.period_evaluations += 1);
        final_state(bundle, t)
    }

    fn update(&self, f: impl FnOnce(&mut InnerStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    /// Fast state at `t_end`, integrating directly from `(t, y)`.
    pub fn advance_to(&self, t: Real, y: &State, t_end: Real) -> CoreResult<State> {
        if t_end == t {
            return Ok(y.clone());
        }
        let bundle = self.run_fast(t, t_end, y, &self.map_options)?;
        final_state(bundle, t)
    }

    /// Fine trajectory of the fast system on `[t, t_end]`.
    pub fn fine_trajectory(&self, t: Real, y: &State, t_end: Real) -> CoreResult<Trajectory> {
        let bundle = self.run_fast(t, t_end, y, &self.trace_options)?;
        match bundle.status {
            Status::Success => Ok(bundle.trajectory),
            status => Err(sub_integration(t, status)),
        }
    }

    fn run_fast(
        &self,
        t: Real,
        t_end: Real,
        y: &State,
        opts: &IntegrateOptions,
    ) -> CoreResult<SolutionBundle> {
        let bundle = integrate(self.fast, (t, t_end), y, opts).map_err(|e| {
            CoreError::SubIntegration {
                t,
                reason: e.to_string(),
            }
        })?;
        self.update(|stats| {
            stats.rhs_evals += bundle.stats.rhs_evals;
            stats.jacobian_evals += bundle.stats.jacobian_evals;
        });
        Ok(bundle)
    }
}

fn sub_integration(t: Real, status: Status) -> CoreError {
    let reason = match status {
        Status::StepFailure { t, reason } => format!("fast integration failed at t={t}: {reason}"),
        Status::EventTerminated { index, t } => format!("fast integration stopped by event {index} at t={t}"),
        Status::Success => "fast integration produced no final state".to_string(),
    };
    CoreError::SubIntegration { t, reason }
}

fn final_state(bundle: SolutionBundle, t: Real) -> CoreResult<State> {
    if !bundle.is_success() {
        return Err(sub_integration(t, bundle.status));
    }
    let SolutionBundle { mut trajectory, .. } = bundle;
    let y = trajectory
        .y
        .pop()
        .ok_or_else(|| sub_integration(t, Status::Success))?;
    ensure_finite_state(&y, "period map")?;
    Ok(y)
}

impl<S: OdeSystem + ?Sized> OdeSystem for EnvelopeSystem<'_, S> {
    fn dimension(&self) -> usize {
        self.fast.dimension()
    }

    fn rhs(&self, t: Real, y: &State) -> CoreResult<State> {
        let (period, y_next) = self.period_map(t, y)?;
        let g = (y_next - y) / period;
        debug!(t, period, norm = g.norm(), "envelope derivative");
        Ok(g)
    }
}
