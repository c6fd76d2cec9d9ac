//! State vector and matrix aliases.
//!
//! A state is immutable per step: integrators produce a new vector on every
//! accepted step instead of mutating the previous one.

use nalgebra::{DMatrix, DVector};

/// Ordered, fixed-length vector of ODE state variables.
pub type State = DVector<f64>;

/// Dense square matrix (Jacobians, iteration matrices).
pub type Matrix = DMatrix<f64>;

/// Build a state from a slice.
pub fn state_from(values: &[f64]) -> State {
    State::from_column_slice(values)
}
