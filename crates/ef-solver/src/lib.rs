//! Nonlinear algebra for implicit integration steps.
//!
//! This crate provides the iteration kernels used by implicit integrators:
//! a Newton solver with a bounded iteration budget and backtracking line
//! search, a relaxed fixed-point iteration for systems without a Jacobian,
//! and finite-difference Jacobian estimation.

pub mod error;
pub mod fixed_point;
pub mod jacobian;
pub mod newton;

pub use error::{SolverError, SolverResult};
pub use fixed_point::{FixedPointConfig, fixed_point_solve};
pub use jacobian::{
    CENTRAL_EPS, FORWARD_EPS, central_difference_jacobian, finite_difference_jacobian,
    system_jacobian,
};
pub use newton::{NewtonConfig, NewtonResult, newton_solve};
