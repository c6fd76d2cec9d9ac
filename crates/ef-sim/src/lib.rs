//! Time integration for ODE systems.
//!
//! Provides:
//! - Forward Euler and fixed-step BDF (orders 1-4) on a uniform grid
//! - Variable-order, variable-step BDF with error control, dense output and
//!   an optional period-aligned step grid
//! - Zero-crossing event detection with bisection
//! - `SolutionBundle` results with status and statistics

pub mod bdf;
pub mod error;
pub mod events;
pub mod integrator;
pub mod options;
pub mod sim;
pub mod solution;
pub mod variable_bdf;

// Internal modules
mod counted;

// Re-exports for public API
pub use bdf::{FixedBdf, bdf_coefficients};
pub use error::{SimError, SimResult};
pub use events::{Crossing, Event, EventDirection};
pub use integrator::{FixedStepper, ForwardEuler, StepCounters, StepGrid, StepReport};
pub use options::{IntegrateOptions, MAX_FIXED_ORDER, MAX_VARIABLE_ORDER, Method, NonlinearMethod};
pub use sim::{integrate, integrate_with_events, validate_problem};
pub use solution::{EnvelopeTrace, EventRecord, SolutionBundle, SolveStats, Status, Trajectory};
pub use variable_bdf::{BdfDense, VariableBdf};
