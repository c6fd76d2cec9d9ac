//! Backward Euler stage equations solved both ways.

use ef_core::{OdeSystem, ParamSystem, State};
use ef_solver::{
    FORWARD_EPS, FixedPointConfig, NewtonConfig, SolverError, finite_difference_jacobian,
    fixed_point_solve, newton_solve,
};
use proptest::prelude::*;

fn decay(_t: f64, y: &State, k: &f64) -> State {
    -*k * y
}

fn cubic(_t: f64, y: &State, _p: &()) -> State {
    State::from_vec(vec![-y[0].powi(3) + y[1], -y[1]])
}

/// Residual of `y = y_prev + h F(t, y)`.
fn stage<'a, S: OdeSystem>(
    system: &'a S,
    t: f64,
    h: f64,
    y_prev: &'a State,
) -> impl Fn(&State) -> Result<State, SolverError> + 'a {
    move |y: &State| Ok(y - y_prev - h * system.rhs(t, y)?)
}

#[test]
fn newton_with_difference_jacobian_solves_nonlinear_stage() {
    let sys = ParamSystem::new(2, (), cubic).unwrap();
    let y_prev = State::from_vec(vec![1.5, 0.5]);
    let h = 0.1;
    let residual = stage(&sys, 0.0, h, &y_prev);

    let result = newton_solve(
        y_prev.clone(),
        &residual,
        |y: &State| finite_difference_jacobian(y, None, &residual, FORWARD_EPS),
        &NewtonConfig::default(),
    )
    .unwrap();

    assert!(result.converged);
    assert!(residual(&result.x).unwrap().norm() < 1e-8);
}

#[test]
fn fixed_point_fails_where_newton_succeeds_on_stiff_stage() {
    let k = 1000.0;
    let sys = ParamSystem::new(1, k, decay).unwrap();
    let y_prev = State::from_element(1, 1.0);
    let h = 0.01;

    // y = y_prev - h k y is an expanding map for h k = 10
    let map = |y: &State| -> Result<State, SolverError> {
        Ok(&y_prev + h * sys.rhs(0.0, y)?)
    };
    let config = FixedPointConfig {
        relaxation: 1.0,
        ..FixedPointConfig::default()
    };
    assert!(fixed_point_solve(y_prev.clone(), map, &config).is_err());

    let residual = stage(&sys, 0.0, h, &y_prev);
    let result = newton_solve(
        y_prev.clone(),
        &residual,
        |y: &State| finite_difference_jacobian(y, None, &residual, FORWARD_EPS),
        &NewtonConfig::default(),
    )
    .unwrap();
    assert!((result.x[0] - 1.0 / (1.0 + h * k)).abs() < 1e-10);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn mild_stages_converge_both_ways(k in 0.1f64..5.0, h in 0.01f64..0.1, y0 in -10.0f64..10.0) {
        let sys = ParamSystem::new(1, k, decay).unwrap();
        let y_prev = State::from_element(1, y0);
        let exact = y0 / (1.0 + h * k);

        let map = |y: &State| -> Result<State, SolverError> {
        Ok(&y_prev + h * sys.rhs(0.0, y)?)
    };
        let fp = fixed_point_solve(y_prev.clone(), map, &FixedPointConfig::default()).unwrap();
        prop_assert!((fp.x[0] - exact).abs() < 1e-6 * (1.0 + exact.abs()));

        let residual = stage(&sys, 0.0, h, &y_prev);
        let nt = newton_solve(
            y_prev.clone(),
            &residual,
            |y: &State| finite_difference_jacobian(y, None, &residual, FORWARD_EPS),
            &NewtonConfig::default(),
        )
        .unwrap();
        prop_assert!((nt.x[0] - exact).abs() < 1e-8 * (1.0 + exact.abs()));
    }
}
