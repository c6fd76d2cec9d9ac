//! ef-core: stable foundation for the envelope-following workspace.
//!
//! Contains:
//! - numeric (Real + tolerances + norms + float helpers)
//! - state (State/Matrix aliases over nalgebra)
//! - system (OdeSystem trait and the parameterized system adapter)
//! - error (shared error types)

pub mod error;
pub mod numeric;
pub mod state;
pub mod system;

// Re-exports: nice ergonomics for downstream crates
pub use error::{CoreError, CoreResult};
pub use numeric::*;
pub use state::*;
pub use system::{JacFn, OdeSystem, ParamSystem, RhsFn};
