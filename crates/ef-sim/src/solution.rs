//! Solution records returned by every integrator.

use crate::error::{SimError, SimResult};
use crate::events::Crossing;
use ef_core::{Real, State};

/// Ordered `(t, y)` samples with strictly increasing times.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Trajectory {
    /// Time points
    pub t: Vec<Real>,
    /// State snapshots
    pub y: Vec<State>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trajectory holding a single initial sample.
    pub fn starting_at(t: Real, y: State) -> Self {
        Self {
            t: vec![t],
            y: vec![y],
        }
    }

    pub fn push(&mut self, t: Real, y: State) {
        self.t.push(t);
        self.y.push(y);
    }

    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    pub fn last(&self) -> Option<(Real, &State)> {
        Some((*self.t.last()?, self.y.last()?))
    }

    pub fn final_time(&self) -> Option<Real> {
        self.t.last().copied()
    }

    pub fn final_state(&self) -> Option<&State> {
        self.y.last()
    }

    pub fn is_strictly_increasing(&self) -> bool {
        self.t.windows(2).all(|w| w[1] > w[0])
    }

    /// Append the samples of `other` that lie strictly after the current end.
    pub fn extend_after(&mut self, other: &Trajectory) {
        let end = self.final_time().unwrap_or(Real::NEG_INFINITY);
        for (t, y) in other.t.iter().zip(other.y.iter()) {
            if *t > end {
                self.push(*t, y.clone());
            }
        }
    }

    /// Keep only samples with `t <= t_cut`.
    pub fn truncate_after(&mut self, t_cut: Real) {
        let keep = self.t.iter().take_while(|t| **t <= t_cut).count();
        self.t.truncate(keep);
        self.y.truncate(keep);
    }
}

/// A located zero crossing of an event function.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRecord {
    /// Index of the event function in the list passed to the solver
    pub index: usize,
    pub t: Real,
    pub y: State,
    pub direction: Crossing,
}

/// How a solve ended.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Status {
    #[default]
    Success,
    /// A step could not be completed; `t` is the last accepted time.
    StepFailure { t: Real, reason: String },
    /// A terminal event stopped the solve at `t`.
    EventTerminated { index: usize, t: Real },
}

/// Counters collected during a solve.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SolveStats {
    /// Accepted steps
    pub steps: usize,
    /// Rejected step attempts (error test, nonlinear failure, fallback)
    pub rejected_steps: usize,
    /// Right-hand side evaluations, including those for difference Jacobians
    pub rhs_evals: usize,
    /// Analytic Jacobian evaluations
    pub jacobian_evals: usize,
    /// Finite-difference Jacobian builds
    pub fd_jacobians: usize,
    /// LU factorizations
    pub lu_decompositions: usize,
    /// Nonlinear solves that did not converge
    pub nonlinear_failures: usize,
    /// Steps whose nonlinear solve exceeded the slow-iteration threshold
    pub slow_steps: usize,
    /// Largest iteration count of a single nonlinear solve
    pub max_nonlinear_iterations: usize,
    /// Fast-period evaluations (envelope solves only)
    pub period_evaluations: usize,
    /// Period measurements at macro samples (envelope solves with an estimated period)
    pub period_estimates: usize,
    /// Final time reached
    pub t_final: Real,
}

impl SolveStats {
    pub fn record_iterations(&mut self, iterations: usize, threshold: usize) {
        self.max_nonlinear_iterations = self.max_nonlinear_iterations.max(iterations);
        if iterations > threshold {
            self.slow_steps += 1;
        }
    }
}

/// Macro samples of an envelope solve.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvelopeTrace {
    /// Fast period at the first macro sample
    pub period: Real,
    /// Fast period in effect at each macro sample
    pub periods: Vec<Real>,
    /// Macro times
    pub t: Vec<Real>,
    /// Envelope states at the macro times
    pub z: Vec<State>,
    /// Fine reconstruction windows, one per macro sample when requested
    pub fine: Vec<Trajectory>,
    /// Macro intervals covered by one-period maps after an implicit step failed
    pub fallback_steps: usize,
}

impl EnvelopeTrace {
    /// Period in effect at sample `i`, falling back to the first period.
    pub fn period_at(&self, i: usize) -> Real {
        self.periods.get(i).copied().unwrap_or(self.period)
    }
}

/// Result of a solve: trajectory, events, optional envelope and status.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SolutionBundle {
    pub trajectory: Trajectory,
    pub events: Vec<EventRecord>,
    pub envelope: Option<EnvelopeTrace>,
    pub status: Status,
    pub stats: SolveStats,
}

impl SolutionBundle {
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn t(&self) -> &[Real] {
        &self.trajectory.t
    }

    pub fn y(&self) -> &[State] {
        &self.trajectory.y
    }

    pub fn final_state(&self) -> Option<&State> {
        self.trajectory.final_state()
    }

    /// Times of all located events.
    pub fn event_times(&self) -> Vec<Real> {
        self.events.iter().map(|e| e.t).collect()
    }

    /// Convert a non-success status into an error.
    pub fn into_result(self) -> SimResult<Self> {
        match &self.status {
            Status::Success => Ok(self),
            Status::StepFailure { t, reason } => Err(SimError::StepFailed {
                t: *t,
                reason: reason.clone(),
            }),
            Status::EventTerminated { index, t } => Err(SimError::EventTerminated {
                index: *index,
                t: *t,
            }),
        }
    }
}
