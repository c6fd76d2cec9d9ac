//! Weakly damped Duffing oscillator, whose period grows as the amplitude
//! decays: the envelope must follow the period along the solve.

use ef_core::{ParamSystem, Real, State};
use ef_envelope::{EnvelopeOptions, Period, envelope_full};
use ef_sim::{IntegrateOptions, integrate};

/// `x'' + c x' + x + x^3 = 0`
fn duffing(_t: Real, y: &State, damping: &Real) -> State {
    let (x, v) = (y[0], y[1]);
    State::from_vec(vec![v, -damping * v - x - x * x * x])
}

fn system() -> ParamSystem<Real> {
    ParamSystem::new(2, 0.005, duffing).unwrap()
}

fn energy(y: &State) -> Real {
    let (x, v) = (y[0], y[1]);
    0.5 * v * v + 0.5 * x * x + 0.25 * x.powi(4)
}

fn reference_energy(tend: Real, y0: &State) -> Real {
    let bundle = integrate(
        &system(),
        (0.0, tend),
        y0,
        &IntegrateOptions::bdf_variable(1e-10, 1e-12),
    )
    .unwrap()
    .into_result()
    .unwrap();
    energy(bundle.final_state().unwrap())
}

#[test]
fn macro_samples_record_the_growing_period() {
    let y0 = State::from_vec(vec![2.0, 0.0]);
    let tend = 400.0;
    let opts = EnvelopeOptions::fixed(Period::Estimate { guess: 4.0 }, 32.0, 2)
        .with_period_tol(0.5);
    let bundle = envelope_full(&system(), (0.0, tend), &y0, &opts).unwrap();

    assert!(bundle.is_success(), "{:?}", bundle.status);
    assert_eq!(bundle.trajectory.final_time(), Some(tend));
    assert!(bundle.trajectory.is_strictly_increasing());
    assert!(bundle.stats.steps < 20, "{} macro steps", bundle.stats.steps);
    assert!(bundle.stats.period_estimates > bundle.stats.steps);

    let envelope = bundle.envelope.as_ref().unwrap();
    assert_eq!(envelope.fallback_steps, 0);
    assert_eq!(envelope.periods.len(), envelope.t.len());
    // T = 3.18 at amplitude 2 and 4.96 at t = 400
    assert!((envelope.periods[0] - 3.18).abs() < 0.05, "{:?}", envelope.periods);
    assert_eq!(envelope.period, envelope.periods[0]);
    let last = envelope.periods[envelope.periods.len() - 1];
    assert!(last > 4.5 && last < 5.2, "{:?}", envelope.periods);
    assert!(envelope.periods.windows(2).all(|w| w[1] > w[0] - 0.05));

    let e_ref = reference_energy(tend, &y0);
    let e = energy(bundle.final_state().unwrap());
    assert!(((e - e_ref) / e_ref).abs() < 0.1, "energy {e} against {e_ref}");
}

#[test]
fn steps_across_a_large_period_change_are_redone() {
    let y0 = State::from_vec(vec![2.0, 0.0]);
    let tend = 100.0;
    let opts = EnvelopeOptions::fixed(Period::Estimate { guess: 4.0 }, 8.0 * 3.18, 2)
        .with_period_tol(0.05);
    let bundle = envelope_full(&system(), (0.0, tend), &y0, &opts).unwrap();

    assert!(bundle.is_success(), "{:?}", bundle.status);
    assert!(bundle.stats.rejected_steps >= 1);
    assert_eq!(bundle.trajectory.final_time(), Some(tend));
    assert!(bundle.trajectory.is_strictly_increasing());

    let envelope = bundle.envelope.as_ref().unwrap();
    for (w, dt) in envelope
        .periods
        .windows(2)
        .zip(envelope.t.windows(2).map(|t| t[1] - t[0]))
    {
        // Multi-period steps never cross more than the tolerance
        if dt > 2.5 * w[0] {
            assert!((w[1] - w[0]).abs() <= 0.05, "{w:?} over {dt}");
        }
    }

    let e_ref = reference_energy(tend, &y0);
    let e = energy(bundle.final_state().unwrap());
    assert!(((e - e_ref) / e_ref).abs() < 0.1, "energy {e} against {e_ref}");
}

#[test]
fn variable_macro_steps_follow_the_period() {
    let y0 = State::from_vec(vec![2.0, 0.0]);
    let tend = 200.0;
    let opts = EnvelopeOptions::variable(Period::Estimate { guess: 4.0 }, 1e-4, 1e-6)
        .with_period_tol(0.2);
    let bundle = envelope_full(&system(), (0.0, tend), &y0, &opts).unwrap();

    assert!(bundle.is_success(), "{:?}", bundle.status);
    assert_eq!(bundle.trajectory.final_time(), Some(tend));
    let envelope = bundle.envelope.as_ref().unwrap();
    // T = 4.09 at t = 200
    let last = envelope.periods[envelope.periods.len() - 1];
    assert!((last - 4.09).abs() < 0.15, "{:?}", envelope.periods);

    let e_ref = reference_energy(tend, &y0);
    let e = energy(bundle.final_state().unwrap());
    assert!(((e - e_ref) / e_ref).abs() < 0.1, "energy {e} against {e_ref}");
}
