//! Envelope transform and driver on linear systems.

use ef_core::{CoreError, CoreResult, OdeSystem, Real, State};
use ef_envelope::{
    EnvelopeError, EnvelopeInterpolator, EnvelopeOptions, EnvelopeSystem, MacroStepping,
    Period, Reconstruction, envelope_full,
};
use ef_sim::{IntegrateOptions, SimError, Status};
use ef_solver::NewtonConfig;
use ef_systems::{LinearDecayParams, linear_decay};
use proptest::prelude::*;

fn decay(rate: Real) -> ef_core::ParamSystem<LinearDecayParams> {
    linear_decay(LinearDecayParams::new(vec![rate]).unwrap()).unwrap()
}

fn one() -> State {
    State::from_element(1, 1.0)
}

/// Exact solution of the envelope ODE of `y' = -k y` from `y = 1`.
///
/// The envelope rate `(exp(-k T) - 1) / T` differs from `-k` by `O(k^2 T)`.
fn envelope_decay(rate: Real, period: Real, t: Real) -> Real {
    (((-rate * period).exp() - 1.0) / period * t).exp()
}

#[test]
fn envelope_derivative_converges_to_vector_field() {
    let sys = decay(1.0);
    let inner = IntegrateOptions::bdf_variable(1e-11, 1e-13);
    let y = State::from_element(1, 2.0);
    let f = -2.0;

    let mut errors = Vec::new();
    for period in [0.1, 0.01, 0.001] {
        let env = EnvelopeSystem::new(&sys, period, &inner).unwrap();
        let g = env.rhs(0.0, &y).unwrap()[0];
        let err = (g - f).abs();
        // G = (exp(-T) - 1) / T y = F (1 - T/2 + ...)
        assert!((err / period - 1.0).abs() < 0.1, "T = {period}, error {err:e}");
        errors.push(err);
    }
    assert!(errors.windows(2).all(|w| w[1] < 0.2 * w[0]));
}

#[test]
fn macro_grid_does_not_drift_over_many_periods() {
    let period = 0.1;
    let h = 5.0 * period;
    let (t0, tend) = (0.3, 100.3);
    let sys = decay(0.01);
    let opts = EnvelopeOptions::fixed(Period::Known(period), h, 2)
        .with_inner(IntegrateOptions::bdf_fixed(period / 8.0, 2));
    let bundle = envelope_full(&sys, (t0, tend), &one(), &opts).unwrap();

    assert!(bundle.is_success(), "{:?}", bundle.status);
    let t = bundle.t();
    assert_eq!(t.len(), 201);
    for (i, ti) in t.iter().enumerate().take(t.len() - 1) {
        let expected = t0 + i as Real * h;
        assert!((ti - expected).abs() <= 1e-12 * expected, "t[{i}] = {ti}");
    }
    assert_eq!(t[t.len() - 1], tend);

    let exact = envelope_decay(0.01, period, tend - t0);
    let y = bundle.final_state().unwrap()[0];
    assert!(((y - exact) / exact).abs() < 1e-4);
}

/// Fails to evaluate beyond `t = 5`.
struct Brittle;

impl OdeSystem for Brittle {
    fn dimension(&self) -> usize {
        1
    }

    fn rhs(&self, t: f64, y: &State) -> CoreResult<State> {
        if t > 5.0 {
            return Err(CoreError::Evaluation {
                message: "model undefined past t=5".to_string(),
            });
        }
        Ok(-y)
    }
}

#[test]
fn failed_sub_integration_is_an_evaluation_error() {
    let env = EnvelopeSystem::new(&Brittle, 1.0, &IntegrateOptions::explicit_euler(0.01)).unwrap();
    assert!(env.rhs(2.0, &one()).is_ok());
    assert!(matches!(
        env.rhs(6.0, &one()),
        Err(CoreError::SubIntegration { .. })
    ));
}

#[test]
fn failed_sub_integration_stops_the_envelope() {
    let opts = EnvelopeOptions::fixed(Period::Known(1.0), 4.0, 2)
        .with_inner(IntegrateOptions::explicit_euler(0.01));
    let bundle = envelope_full(&Brittle, (0.0, 20.0), &one(), &opts).unwrap();

    let Status::StepFailure { t, reason } = &bundle.status else {
        panic!("expected a step failure, got {:?}", bundle.status);
    };
    assert_eq!(*t, 4.0);
    assert!(reason.contains("one-period map"), "{reason}");
    assert_eq!(bundle.t(), &[0.0, 4.0]);
    assert_eq!(bundle.stats.rejected_steps, 1);
    assert!(matches!(
        bundle.into_result(),
        Err(SimError::StepFailed { .. })
    ));
}

fn failing_newton() -> NewtonConfig {
    NewtonConfig {
        max_iterations: 1,
        abs_tol: 0.0,
        rel_tol: 0.0,
        step_tol: 0.0,
        ..NewtonConfig::default()
    }
}

#[test]
fn failed_macro_steps_fall_back_to_period_maps() {
    let sys = decay(0.1);
    let mut opts = EnvelopeOptions::fixed(Period::Known(1.0), 4.0, 2);
    opts.newton = failing_newton();
    let bundle = envelope_full(&sys, (0.0, 12.0), &one(), &opts).unwrap();

    assert!(bundle.is_success(), "{:?}", bundle.status);
    assert_eq!(bundle.t(), &[0.0, 4.0, 8.0, 12.0]);
    assert_eq!(bundle.envelope.as_ref().unwrap().fallback_steps, 3);
    assert_eq!(bundle.stats.rejected_steps, 3);
    assert_eq!(bundle.stats.nonlinear_failures, 3);

    // Consecutive one-period maps are the exact flow
    let y = bundle.final_state().unwrap()[0];
    assert!((y - (-1.2_f64).exp()).abs() < 1e-8);
}

#[test]
fn exhausted_fallbacks_end_the_solve() {
    let sys = decay(0.1);
    let mut opts = EnvelopeOptions::fixed(Period::Known(1.0), 4.0, 2).with_max_fallbacks(1);
    opts.newton = failing_newton();
    let bundle = envelope_full(&sys, (0.0, 12.0), &one(), &opts).unwrap();

    assert!(matches!(bundle.status, Status::StepFailure { t, .. } if t == 4.0));
    assert_eq!(bundle.t(), &[0.0, 4.0]);
}

#[test]
fn variable_macro_steps_cover_many_periods() {
    let sys = decay(0.05);
    let opts = EnvelopeOptions::variable(Period::Known(0.1), 1e-5, 1e-8)
        .with_inner(IntegrateOptions::bdf_fixed(0.1 / 16.0, 3));
    let bundle = envelope_full(&sys, (0.0, 50.0), &one(), &opts).unwrap();

    assert!(bundle.is_success(), "{:?}", bundle.status);
    assert_eq!(bundle.trajectory.final_time(), Some(50.0));
    assert!(bundle.stats.steps < 250, "{} macro steps", bundle.stats.steps);
    for t in bundle.t() {
        let periods = t / 0.1;
        assert!((periods - periods.round()).abs() < 1e-6, "t = {t}");
    }
    let exact = envelope_decay(0.05, 0.1, 50.0);
    let y = bundle.final_state().unwrap()[0];
    assert!(((y - exact) / exact).abs() < 1e-3);
}

#[test]
fn trapezoidal_macro_steps_follow_the_decay_envelope() {
    let sys = decay(0.05);
    let opts = EnvelopeOptions::trapezoidal(Period::Known(0.1), 1e-6, 1e-8)
        .with_inner(IntegrateOptions::bdf_fixed(0.1 / 16.0, 3));
    let bundle = envelope_full(&sys, (0.0, 50.0), &one(), &opts).unwrap();

    assert!(bundle.is_success(), "{:?}", bundle.status);
    assert_eq!(bundle.trajectory.final_time(), Some(50.0));
    assert!(bundle.trajectory.is_strictly_increasing());
    assert!(bundle.stats.steps < 250, "{} macro steps", bundle.stats.steps);
    assert!(bundle.stats.fd_jacobians > 0);
    for t in bundle.t() {
        let periods = t / 0.1;
        assert!((periods - periods.round()).abs() < 1e-6, "t = {t}");
    }
    let exact = envelope_decay(0.05, 0.1, 50.0);
    let y = bundle.final_state().unwrap()[0];
    assert!(((y - exact) / exact).abs() < 1e-3);
}

#[test]
fn trapezoidal_steps_respect_the_period_cap() {
    let sys = decay(0.01);
    let mut opts = EnvelopeOptions::trapezoidal(Period::Known(0.1), 1e-3, 1e-6)
        .with_inner(IntegrateOptions::bdf_fixed(0.1 / 8.0, 2));
    opts.macro_stepping = MacroStepping::Trapezoidal {
        rtol: 1e-3,
        atol: 1e-6,
        max_step_periods: 5,
    };
    let bundle = envelope_full(&sys, (0.0, 20.0), &one(), &opts).unwrap();

    assert!(bundle.is_success(), "{:?}", bundle.status);
    for w in bundle.t().windows(2) {
        assert!(w[1] - w[0] <= 0.5 + 1e-9, "step {}", w[1] - w[0]);
    }
}

#[test]
fn reconstruction_windows_start_at_macro_samples() {
    let sys = decay(0.1);
    let opts = EnvelopeOptions::fixed(Period::Known(1.0), 2.0, 1)
        .with_reconstruction(Reconstruction::Window { periods: 1 });
    let bundle = envelope_full(&sys, (0.0, 6.0), &one(), &opts).unwrap();
    let envelope = bundle.envelope.as_ref().unwrap();

    assert_eq!(envelope.fine.len(), envelope.t.len() - 1);
    for (window, (t, z)) in envelope.fine.iter().zip(envelope.t.iter().zip(&envelope.z)) {
        assert_eq!(window.t[0], *t);
        assert_eq!(&window.y[0], z);
        assert_eq!(window.final_time(), Some(t + 1.0));
        assert!(window.len() > 2);
    }
}

#[test]
fn interpolator_reaches_inside_macro_steps() {
    let sys = decay(0.1);
    let inner = IntegrateOptions::bdf_variable(1e-10, 1e-12);
    let opts = EnvelopeOptions::fixed(Period::Known(1.0), 1.0, 1).with_inner(inner.clone());
    let bundle = envelope_full(&sys, (0.0, 5.0), &one(), &opts).unwrap();

    let env = EnvelopeSystem::new(&sys, 1.0, &inner).unwrap();
    let interp = EnvelopeInterpolator::new(&env, bundle.envelope.as_ref().unwrap()).unwrap();
    let y = interp.state_at(2.6).unwrap()[0];
    assert!((y - (-0.26_f64).exp()).abs() < 1e-8);
    assert!(matches!(
        interp.state_at(5.5),
        Err(EnvelopeError::OutOfRange { .. })
    ));
}

#[test]
fn estimated_period_needs_a_positive_guess() {
    let sys = decay(0.1);
    let opts = EnvelopeOptions::fixed(Period::Estimate { guess: -1.0 }, 4.0, 2);
    assert!(matches!(
        envelope_full(&sys, (0.0, 8.0), &one(), &opts),
        Err(EnvelopeError::InvalidConfig { .. })
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn macro_times_are_spaced_by_the_macro_step(
        t0 in -5.0..5.0f64,
        periods_per_step in 1usize..5,
        total_periods in 1usize..30,
        extra in 0.0..0.9f64,
    ) {
        let period = 0.5;
        let h = periods_per_step as Real * period;
        let tend = t0 + (total_periods as Real + extra) * period;
        let sys = decay(0.2);
        let opts = EnvelopeOptions::fixed(Period::Known(period), h, 2)
            .with_inner(IntegrateOptions::bdf_fixed(period / 4.0, 2));
        let bundle = envelope_full(&sys, (t0, tend), &one(), &opts).unwrap();

        prop_assert!(bundle.is_success());
        let t = bundle.t();
        prop_assert!(bundle.trajectory.is_strictly_increasing());
        prop_assert_eq!(t[t.len() - 1], tend);

        let full_steps = total_periods / periods_per_step;
        for i in 0..=full_steps {
            let expected = t0 + i as Real * h;
            prop_assert!((t[i] - expected).abs() <= 1e-12 * (1.0 + expected.abs()));
        }
    }
}
