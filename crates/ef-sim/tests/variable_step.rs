//! Variable-step BDF accuracy, statistics and the period-aligned grid.

use std::f64::consts::PI;

use ef_core::{Matrix, ParamSystem, Real, State};
use ef_sim::{IntegrateOptions, Status, integrate};

fn decay(_t: Real, y: &State, k: &Real) -> State {
    -*k * y
}

fn harmonic(_t: Real, y: &State, _p: &()) -> State {
    State::from_vec(vec![y[1], -y[0]])
}

fn harmonic_jac(_t: Real, _y: &State, _p: &()) -> Matrix {
    Matrix::from_row_slice(2, 2, &[0.0, 1.0, -1.0, 0.0])
}

fn stiff_vdp(_t: Real, y: &State, mu: &Real) -> State {
    State::from_vec(vec![y[1], mu * (1.0 - y[0] * y[0]) * y[1] - y[0]])
}

fn stiff_vdp_jac(_t: Real, y: &State, mu: &Real) -> Matrix {
    Matrix::from_row_slice(
        2,
        2,
        &[0.0, 1.0, -2.0 * mu * y[0] * y[1] - 1.0, mu * (1.0 - y[0] * y[0])],
    )
}

#[test]
fn exponential_decay_meets_tolerance() {
    let sys = ParamSystem::new(1, 1.0, decay).unwrap();
    let bundle = integrate(
        &sys,
        (0.0, 5.0),
        &State::from_element(1, 1.0),
        &IntegrateOptions::bdf_variable(1e-6, 1e-9),
    )
    .unwrap();

    assert!(bundle.is_success());
    let exact = (-5.0_f64).exp();
    let y = bundle.final_state().unwrap()[0];
    assert!((y - exact).abs() / exact < 1e-3, "{y} vs {exact}");
    // No analytic Jacobian: differences are used
    assert!(bundle.stats.fd_jacobians >= 1);
    assert_eq!(bundle.stats.jacobian_evals, 0);
}

#[test]
fn harmonic_oscillator_over_three_periods() {
    let sys = ParamSystem::new(2, (), harmonic)
        .unwrap()
        .with_jacobian(harmonic_jac);
    let tend = 6.0 * PI;
    let bundle = integrate(
        &sys,
        (0.0, tend),
        &State::from_vec(vec![0.0, 1.0]),
        &IntegrateOptions::bdf_variable(1e-9, 1e-11),
    )
    .unwrap();

    assert!(bundle.is_success());
    let y = bundle.final_state().unwrap();
    assert!(y[0].abs() < 1e-4, "{y}");
    assert!((y[1] - 1.0).abs() < 1e-4, "{y}");
    assert!(bundle.stats.jacobian_evals >= 1);
    assert!(bundle.stats.steps > 10);
}

#[test]
fn tighter_tolerance_takes_more_steps() {
    let sys = ParamSystem::new(1, 1.0, decay).unwrap();
    let y0 = State::from_element(1, 1.0);
    let loose = integrate(&sys, (0.0, 5.0), &y0, &IntegrateOptions::bdf_variable(1e-3, 1e-6)).unwrap();
    let tight = integrate(&sys, (0.0, 5.0), &y0, &IntegrateOptions::bdf_variable(1e-8, 1e-11)).unwrap();
    assert!(tight.stats.steps > loose.stats.steps);
}

#[test]
fn period_hint_aligns_steps() {
    let period = 0.5;
    let sys = ParamSystem::new(1, 0.1, decay).unwrap();
    let opts = IntegrateOptions::bdf_variable(1e-2, 1e-3).with_period(period);
    let bundle = integrate(&sys, (0.0, 20.0), &State::from_element(1, 1.0), &opts).unwrap();

    assert!(bundle.is_success());
    for w in bundle.t().windows(2) {
        let periods = (w[1] - w[0]) / period;
        assert!(periods >= 1.0 - 1e-9, "step {} shorter than a period", w[1] - w[0]);
        assert!((periods - periods.round()).abs() < 1e-6, "step {periods} periods");
    }
    assert_eq!(bundle.trajectory.final_time(), Some(20.0));
}

#[test]
fn period_hint_with_unreachable_tolerance_fails() {
    let sys = ParamSystem::new(1, 1.0, decay).unwrap();
    let opts = IntegrateOptions::bdf_variable(1e-10, 1e-12).with_period(0.5);
    let bundle = integrate(&sys, (0.0, 10.0), &State::from_element(1, 1.0), &opts).unwrap();

    match &bundle.status {
        Status::StepFailure { reason, .. } => assert!(reason.contains("below the minimum")),
        other => panic!("expected step failure, got {other:?}"),
    }
    assert!(bundle.into_result().is_err());
}

#[test]
fn error_rejections_refactor_the_iteration_matrix() {
    let sys = ParamSystem::new(2, 1000.0, stiff_vdp)
        .unwrap()
        .with_jacobian(stiff_vdp_jac);
    let bundle = integrate(
        &sys,
        (0.0, 3000.0),
        &State::from_vec(vec![2.0, 0.0]),
        &IntegrateOptions::bdf_variable(1e-6, 1e-8),
    )
    .unwrap();

    assert!(bundle.is_success(), "{:?}", bundle.status);
    assert!(bundle.stats.rejected_steps > 0);
    // A retry after an error rejection must not reuse the matrix of the longer step
    assert_eq!(bundle.stats.nonlinear_failures, 0);
}
