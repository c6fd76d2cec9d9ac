//! Event location on the harmonic oscillator `x = sin t`.

use std::f64::consts::PI;

use ef_core::{Matrix, ParamSystem, Real, State};
use ef_sim::{
    Crossing, Event, EventDirection, IntegrateOptions, Status, integrate_with_events,
};

fn harmonic(_t: Real, y: &State, _p: &()) -> State {
    State::from_vec(vec![y[1], -y[0]])
}

fn harmonic_jac(_t: Real, _y: &State, _p: &()) -> Matrix {
    Matrix::from_row_slice(2, 2, &[0.0, 1.0, -1.0, 0.0])
}

fn system() -> ParamSystem<()> {
    ParamSystem::new(2, (), harmonic)
        .unwrap()
        .with_jacobian(harmonic_jac)
}

fn y0() -> State {
    State::from_vec(vec![0.0, 1.0])
}

#[test]
fn crossings_are_recorded_with_direction() {
    let events = [Event::new(|_t, y: &State| y[0])];
    let bundle = integrate_with_events(
        &system(),
        (0.0, 7.0),
        &y0(),
        &IntegrateOptions::bdf_variable(1e-8, 1e-10),
        &events,
    )
    .unwrap();

    assert!(bundle.is_success());
    assert_eq!(bundle.events.len(), 2);
    assert_eq!(bundle.events[0].direction, Crossing::Descending);
    assert!((bundle.events[0].t - PI).abs() < 1e-4);
    assert_eq!(bundle.events[1].direction, Crossing::Ascending);
    assert!((bundle.events[1].t - 2.0 * PI).abs() < 1e-4);
    assert_eq!(bundle.trajectory.final_time(), Some(7.0));
}

#[test]
fn terminal_event_stops_the_solve() {
    let events = [Event::new(|_t, y: &State| y[0])
        .with_direction(EventDirection::Descending)
        .terminal()];
    let bundle = integrate_with_events(
        &system(),
        (0.0, 10.0),
        &y0(),
        &IntegrateOptions::bdf_variable(1e-8, 1e-10),
        &events,
    )
    .unwrap();

    let Status::EventTerminated { index, t } = bundle.status else {
        panic!("expected terminal event, got {:?}", bundle.status);
    };
    assert_eq!(index, 0);
    assert!((t - PI).abs() < 1e-4);
    assert_eq!(bundle.trajectory.final_time(), Some(t));
    assert!(bundle.final_state().unwrap()[0].abs() < 1e-4);
    assert!(bundle.trajectory.is_strictly_increasing());
}

#[test]
fn fixed_step_events_use_linear_interpolation() {
    // y = t crosses 0.25 between grid points 0.2 and 0.3
    fn ramp(_t: Real, _y: &State, _p: &()) -> State {
        State::from_element(1, 1.0)
    }
    let sys = ParamSystem::new(1, (), ramp).unwrap();
    let events = [Event::new(|_t, y: &State| y[0] - 0.25).with_direction(EventDirection::Ascending)];
    let bundle = integrate_with_events(
        &sys,
        (0.0, 1.0),
        &State::from_element(1, 0.0),
        &IntegrateOptions::explicit_euler(0.1),
        &events,
    )
    .unwrap();

    assert_eq!(bundle.events.len(), 1);
    assert!((bundle.events[0].t - 0.25).abs() < 1e-12);
    assert!((bundle.events[0].y[0] - 0.25).abs() < 1e-12);
}
