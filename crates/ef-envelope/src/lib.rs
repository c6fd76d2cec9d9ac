//! Envelope following for oscillators with a fast period.
//!
//! The envelope of a fast system `F` with period `T` is the slow system
//!
//! ```text
//! G(t, y) = (Phi_T(t, y) - y) / T
//! ```
//!
//! where `Phi_T` integrates `F` over one period. Stepping `G` with an
//! implicit integrator covers many periods per macro step.
//!
//! Provides:
//! - `EnvelopeSystem`: the transform, itself an `OdeSystem`
//! - `Period`: known fast period, or one measured at every evaluation
//! - `envelope_full`: fixed BDF, variable BDF or trapezoidal macro stepping
//!   with optional fine reconstruction
//! - `EnvelopeInterpolator`: fine state at any time of an envelope solve

pub mod driver;
pub mod error;
pub mod options;
pub mod period;
pub mod reconstruct;
pub mod transform;

pub use driver::envelope_full;
pub use error::{EnvelopeError, EnvelopeResult};
pub use options::{
    DEFAULT_MAX_STEP_PERIODS, DEFAULT_PERIOD_TOL, EnvelopeOptions, MacroStepping, Reconstruction,
};
pub use period::{Period, estimate_period};
pub use reconstruct::EnvelopeInterpolator;
pub use transform::EnvelopeSystem;

/// Relative slack when counting whole periods in an interval.
pub(crate) const PERIOD_SLACK: ef_core::Real = 1e-9;

/// Number of whole periods in `span`, absorbing rounding noise.
pub(crate) fn whole_periods(span: ef_core::Real, period: ef_core::Real) -> usize {
    let ratio = span / period;
    if ratio <= 0.0 {
        0
    } else {
        (ratio + PERIOD_SLACK * ratio.max(1.0)).floor() as usize
    }
}
