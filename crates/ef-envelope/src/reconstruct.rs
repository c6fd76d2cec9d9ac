//! Fine states between envelope samples.

use crate::error::{EnvelopeError, EnvelopeResult};
use crate::transform::EnvelopeSystem;
use crate::{PERIOD_SLACK, whole_periods};
use ef_core::{OdeSystem, Real, State};
use ef_sim::EnvelopeTrace;

/// Evaluates the fast state at any time covered by an envelope solve.
///
/// The fast system is integrated forward from the period boundary at or
/// before `t`, counting whole periods from the last macro sample with the
/// period recorded there. The state at that boundary is the sample itself,
/// or the linear interpolation of the neighbouring samples when the boundary
/// lies between them.
pub struct EnvelopeInterpolator<'e, 'a, S: OdeSystem + ?Sized> {
    env: &'e EnvelopeSystem<'a, S>,
    trace: &'e EnvelopeTrace,
}

impl<'e, 'a, S: OdeSystem + ?Sized> EnvelopeInterpolator<'e, 'a, S> {
    pub fn new(env: &'e EnvelopeSystem<'a, S>, trace: &'e EnvelopeTrace) -> EnvelopeResult<Self> {
        if trace.t.is_empty() || trace.t.len() != trace.z.len() {
            return Err(EnvelopeError::config("envelope trace has no samples"));
        }
        let periods_ok = trace.periods.is_empty() || trace.periods.len() == trace.t.len();
        let positive = (0..trace.t.len())
            .map(|i| trace.period_at(i))
            .all(|p| p.is_finite() && p > 0.0);
        if !periods_ok || !positive {
            return Err(EnvelopeError::config(
                "envelope trace needs one positive period per sample",
            ));
        }
        Ok(Self { env, trace })
    }

    pub fn start(&self) -> Real {
        self.trace.t[0]
    }

    pub fn end(&self) -> Real {
        self.trace.t[self.trace.t.len() - 1]
    }

    /// Fast state at `t`.
    pub fn state_at(&self, t: Real) -> EnvelopeResult<State> {
        let (start, end) = (self.start(), self.end());
        if !(t >= start && t <= end) {
            return Err(EnvelopeError::OutOfRange { t, start, end });
        }
        let (t_from, y_from) = self.boundary_state(t);
        // A sample may sit a rounding error after its period boundary
        if t <= t_from {
            return Ok(y_from);
        }
        Ok(self.env.advance_to(t_from, &y_from, t)?)
    }

    /// Period boundary at or before `t` and the state there.
    fn boundary_state(&self, t: Real) -> (Real, State) {
        let times = &self.trace.t;
        let states = &self.trace.z;

        // Last sample at or before `t`, with slack for rounding
        let tol = PERIOD_SLACK * t.abs().max(1.0);
        let idx = times.partition_point(|s| *s <= t + tol).saturating_sub(1);
        let period = self.trace.period_at(idx);
        let k = whole_periods(t - times[idx], period);
        let next = idx + 1;
        if k == 0 || next >= times.len() {
            return (times[idx], states[idx].clone());
        }

        let boundary = times[idx] + k as Real * period;
        let w = (boundary - times[idx]) / (times[next] - times[idx]);
        let y = (1.0 - w) * &states[idx] + w * &states[next];
        (boundary, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ef_sim::IntegrateOptions;
    use ef_systems::{HarmonicParams, harmonic_oscillator};

    fn trace_of(period: Real, t: Vec<Real>, z: Vec<State>) -> EnvelopeTrace {
        EnvelopeTrace {
            period,
            t,
            z,
            ..EnvelopeTrace::default()
        }
    }

    #[test]
    fn state_inside_a_sampled_period() {
        let params = HarmonicParams::new(1.0).unwrap();
        let period = params.period();
        let sys = harmonic_oscillator(params.clone()).unwrap();
        let env =
            EnvelopeSystem::new(&sys, period, &IntegrateOptions::bdf_variable(1e-10, 1e-12))
                .unwrap();

        let y0 = State::from_vec(vec![1.0, 0.0]);
        let trace = trace_of(
            period,
            vec![0.0, 3.0 * period, 4.0 * period],
            vec![y0.clone(), y0.clone(), y0.clone()],
        );
        let interp = EnvelopeInterpolator::new(&env, &trace).unwrap();

        let t = 3.25 * period;
        let y = interp.state_at(t).unwrap();
        let exact = params.exact(t, &y0);
        assert!((y - exact).norm() < 1e-6);

        // A period boundary between samples takes the interpolated state
        let mid = interp.state_at(period + 0.5).unwrap();
        assert!((mid - params.exact(0.5, &y0)).norm() < 1e-6);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let sys = harmonic_oscillator(HarmonicParams::new(1.0).unwrap()).unwrap();
        let env = EnvelopeSystem::new(&sys, 1.0, &IntegrateOptions::bdf_variable(1e-8, 1e-10))
            .unwrap();
        let trace = trace_of(1.0, vec![0.0, 2.0], vec![State::zeros(2), State::zeros(2)]);
        let interp = EnvelopeInterpolator::new(&env, &trace).unwrap();

        assert!(matches!(
            interp.state_at(2.5),
            Err(EnvelopeError::OutOfRange { .. })
        ));
        assert_eq!(interp.state_at(2.0).unwrap(), State::zeros(2));
    }

    #[test]
    fn malformed_sample_periods_are_rejected() {
        let sys = harmonic_oscillator(HarmonicParams::new(1.0).unwrap()).unwrap();
        let env = EnvelopeSystem::new(&sys, 1.0, &IntegrateOptions::bdf_variable(1e-8, 1e-10))
            .unwrap();
        let mut trace = trace_of(1.0, vec![0.0, 2.0], vec![State::zeros(2), State::zeros(2)]);
        trace.periods = vec![1.0];
        assert!(EnvelopeInterpolator::new(&env, &trace).is_err());

        trace.periods = vec![1.0, 0.0];
        assert!(EnvelopeInterpolator::new(&env, &trace).is_err());
    }

    #[test]
    fn boundaries_follow_the_period_of_each_sample() {
        // With period 2 recorded at t = 10, the boundary before 13.5 is 12
        let params = HarmonicParams::new(std::f64::consts::PI).unwrap();
        let period = params.period();
        let sys = harmonic_oscillator(params.clone()).unwrap();
        let env =
            EnvelopeSystem::new(&sys, period, &IntegrateOptions::bdf_variable(1e-10, 1e-12))
                .unwrap();

        let y0 = State::from_vec(vec![1.0, 0.0]);
        let mut trace = trace_of(
            1.0,
            vec![0.0, 10.0, 20.0],
            vec![y0.clone(), y0.clone(), y0.clone()],
        );
        trace.periods = vec![1.0, period, period];
        let interp = EnvelopeInterpolator::new(&env, &trace).unwrap();

        let y = interp.state_at(13.5).unwrap();
        assert!((y - params.exact(1.5, &y0)).norm() < 1e-6);
    }
}
