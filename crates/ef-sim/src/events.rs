//! Zero-crossing event detection.
//!
//! After every accepted step each event function is evaluated at the new
//! point. A sign change against the previous value marks a crossing, which is
//! then located by bisection on the step interpolant.

use crate::solution::EventRecord;
use ef_core::{Real, State};

/// Which crossings an event reacts to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventDirection {
    /// Negative to non-negative
    Ascending,
    /// Positive to non-positive
    Descending,
    #[default]
    Either,
}

/// Direction of a located crossing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Crossing {
    Ascending,
    Descending,
}

impl Crossing {
    fn classify(g_old: Real, g_new: Real) -> Option<Self> {
        if g_old < 0.0 && g_new >= 0.0 {
            Some(Crossing::Ascending)
        } else if g_old > 0.0 && g_new <= 0.0 {
            Some(Crossing::Descending)
        } else {
            None
        }
    }

    fn reached(self, g: Real) -> bool {
        match self {
            Crossing::Ascending => g >= 0.0,
            Crossing::Descending => g <= 0.0,
        }
    }
}

/// Scalar event function `g(t, y)` with its filter and terminal flag.
pub struct Event<'a> {
    function: Box<dyn Fn(Real, &State) -> Real + 'a>,
    pub direction: EventDirection,
    pub terminal: bool,
}

impl<'a> Event<'a> {
    pub fn new(function: impl Fn(Real, &State) -> Real + 'a) -> Self {
        Self {
            function: Box::new(function),
            direction: EventDirection::Either,
            terminal: false,
        }
    }

    pub fn with_direction(mut self, direction: EventDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Stop the solve at the first matching crossing.
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    pub fn eval(&self, t: Real, y: &State) -> Real {
        (self.function)(t, y)
    }

    fn accepts(&self, crossing: Crossing) -> bool {
        match self.direction {
            EventDirection::Either => true,
            EventDirection::Ascending => crossing == Crossing::Ascending,
            EventDirection::Descending => crossing == Crossing::Descending,
        }
    }
}

impl std::fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("direction", &self.direction)
            .field("terminal", &self.terminal)
            .finish_non_exhaustive()
    }
}

const MAX_BISECTIONS: usize = 100;

/// Outcome of checking one accepted step.
#[derive(Debug, Default)]
pub(crate) struct StepEvents {
    /// Crossings in time order, cut at the first terminal one
    pub records: Vec<EventRecord>,
    /// The terminal crossing, if any
    pub terminal: Option<(usize, Real)>,
}

/// Tracks the previous value of every event function.
pub(crate) struct EventTracker<'e, 'a> {
    events: &'e [Event<'a>],
    last: Vec<Real>,
}

impl<'e, 'a> EventTracker<'e, 'a> {
    pub fn new(events: &'e [Event<'a>], t0: Real, y0: &State) -> Self {
        let last = events.iter().map(|e| e.eval(t0, y0)).collect();
        Self { events, last }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Check the step `[t_old, t_new]`; `interp` evaluates the step interpolant.
    pub fn check<I>(&mut self, t_old: Real, t_new: Real, y_new: &State, interp: I) -> StepEvents
    where
        I: Fn(Real) -> State,
    {
        let mut found = Vec::new();
        let mut g_new_all = Vec::with_capacity(self.events.len());

        for (index, event) in self.events.iter().enumerate() {
            let g_old = self.last[index];
            let g_new = event.eval(t_new, y_new);
            g_new_all.push(g_new);

            let Some(crossing) = Crossing::classify(g_old, g_new) else {
                continue;
            };
            if !event.accepts(crossing) {
                continue;
            }

            let t = locate(event, crossing, t_old, t_new, &interp);
            let y = if t == t_new {
                y_new.clone()
            } else {
                interp(t)
            };
            found.push((
                EventRecord {
                    index,
                    t,
                    y,
                    direction: crossing,
                },
                event.terminal,
            ));
        }

        self.last = g_new_all;
        found.sort_by(|a, b| a.0.t.total_cmp(&b.0.t));

        let mut out = StepEvents::default();
        for (record, terminal) in found {
            if terminal {
                out.terminal = Some((record.index, record.t));
                out.records.push(record);
                break;
            }
            out.records.push(record);
        }
        out
    }
}

/// Bisection on `[t_old, t_new]` for the first time the crossing is reached.
fn locate<I>(event: &Event<'_>, crossing: Crossing, t_old: Real, t_new: Real, interp: &I) -> Real
where
    I: Fn(Real) -> State,
{
    let mut lo = t_old;
    let mut hi = t_new;
    for _ in 0..MAX_BISECTIONS {
        let xtol = 4.0 * Real::EPSILON * hi.abs().max(1.0);
        if hi - lo <= xtol {
            break;
        }
        let mid = 0.5 * (lo + hi);
        if crossing.reached(event.eval(mid, &interp(mid))) {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    hi
}
