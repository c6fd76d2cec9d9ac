//! Fast period selection.

use crate::error::{EnvelopeError, EnvelopeResult};
use ef_core::{CoreError, CoreResult, OdeSystem, Real, State};
use ef_sim::{Crossing, Event, EventDirection, IntegrateOptions, integrate_with_events};
use tracing::{debug, warn};

/// How the envelope obtains the fast period.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Period {
    /// Period known in advance (forced systems)
    Known(Real),
    /// Period measured from the fast dynamics at every envelope
    /// evaluation, the first time from `guess`
    Estimate { guess: Real },
}

impl Period {
    /// The shortest of several candidate periods.
    pub fn from_candidates(candidates: &[Real]) -> EnvelopeResult<Self> {
        let shortest = candidates.iter().copied().fold(Real::INFINITY, Real::min);
        if !(shortest.is_finite() && shortest > 0.0) {
            return Err(EnvelopeError::config(
                "period candidates must be a non-empty list of positive values",
            ));
        }
        Ok(Period::Known(shortest))
    }

    pub(crate) fn validate(&self) -> EnvelopeResult<()> {
        let (name, value) = match *self {
            Period::Known(p) => ("period", p),
            Period::Estimate { guess } => ("period guess", guess),
        };
        if !(value.is_finite() && value > 0.0) {
            return Err(EnvelopeError::config(format!(
                "{name} must be positive, got {value}"
            )));
        }
        Ok(())
    }

    /// The known period, or the guess an estimate starts from.
    pub fn initial(&self) -> Real {
        match *self {
            Period::Known(p) => p,
            Period::Estimate { guess } => guess,
        }
    }

    pub fn is_estimated(&self) -> bool {
        matches!(self, Period::Estimate { .. })
    }
}

/// Measure the period of an autonomous oscillation through `(t, y)`.
///
/// The trajectory is integrated for up to two guessed periods while watching
/// the hyperplane through `y` orthogonal to `F(t, y)`. The first ascending
/// crossing later than half a guessed period closes the orbit. Without such a
/// crossing the guess is returned.
pub fn estimate_period<S: OdeSystem + ?Sized>(
    system: &S,
    t: Real,
    y: &State,
    guess: Real,
    inner: &IntegrateOptions,
) -> EnvelopeResult<Real> {
    Ok(measure_period(system, t, y, guess, inner)?.period)
}

/// A period estimate and the fast work it took.
#[derive(Clone, Debug)]
pub(crate) struct Measurement {
    pub period: Real,
    /// Fast state at the closing crossing, when one was found
    pub closing: Option<State>,
    pub rhs_evals: usize,
    pub jacobian_evals: usize,
}

pub(crate) fn measure_period<S: OdeSystem + ?Sized>(
    system: &S,
    t: Real,
    y: &State,
    guess: Real,
    inner: &IntegrateOptions,
) -> CoreResult<Measurement> {
    let f = system.rhs(t, y)?;
    let norm = f.norm();
    if !(norm > 0.0 && norm.is_finite()) {
        warn!(t, guess, "zero vector field at the state, using the period guess");
        return Ok(Measurement {
            period: guess,
            closing: None,
            rhs_evals: 1,
            jacobian_evals: 0,
        });
    }
    let normal = f / norm;
    let offset = normal.dot(y);

    let events = [
        Event::new(|_t, y: &State| normal.dot(y) - offset).with_direction(EventDirection::Ascending)
    ];
    let opts = IntegrateOptions {
        record_every: usize::MAX,
        ..inner.clone()
    };
    let bundle = integrate_with_events(system, (t, t + 2.0 * guess), y, &opts, &events)
        .map_err(|e| CoreError::SubIntegration {
            t,
            reason: e.to_string(),
        })?;

    let closing = bundle
        .events
        .iter()
        .find(|e| e.direction == Crossing::Ascending && e.t - t > 0.5 * guess);
    let (period, closing) = match closing {
        Some(event) => {
            let period = event.t - t;
            debug!(t, period, guess, "estimated fast period");
            (period, Some(event.y.clone()))
        }
        None => {
            warn!(t, guess, "no return to the initial hyperplane, using the period guess");
            (guess, None)
        }
    };
    Ok(Measurement {
        period,
        closing,
        rhs_evals: bundle.stats.rhs_evals + 1,
        jacobian_evals: bundle.stats.jacobian_evals,
    })
}
