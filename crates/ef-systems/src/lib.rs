//! Example payload systems for the integrators.
//!
//! - `vanderpol`: forced Van der Pol oscillator with analytic Jacobian
//! - `linear`: linear decay and harmonic oscillator

pub mod linear;
pub mod vanderpol;

pub use linear::{HarmonicParams, LinearDecayParams, harmonic_oscillator, linear_decay};
pub use vanderpol::{VanDerPolParams, van_der_pol};
