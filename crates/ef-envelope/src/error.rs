//! Error types for envelope following.

use ef_core::CoreError;
use ef_sim::SimError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("Invalid envelope configuration: {what}")]
    InvalidConfig { what: String },

    #[error("Time {t} is outside the envelope solution [{start}, {end}]")]
    OutOfRange { t: f64, start: f64, end: f64 },

    #[error("Integration error: {0}")]
    Sim(#[from] SimError),

    #[error("System error: {0}")]
    System(#[from] CoreError),
}

impl EnvelopeError {
    pub(crate) fn config(what: impl Into<String>) -> Self {
        EnvelopeError::InvalidConfig { what: what.into() }
    }
}

pub type EnvelopeResult<T> = Result<T, EnvelopeError>;
