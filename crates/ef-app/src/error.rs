//! Error types for the ef-app service layer.

use std::path::PathBuf;

/// Application error type that wraps errors from the backend crates
/// behind one interface for the CLI.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Scenario error: {0}")]
    Scenario(String),

    #[error("Failed to write output file: {path}")]
    OutputWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Scenario compilation failed: {0}")]
    Compile(String),

    #[error("Simulation error: {0}")]
    Simulation(String),

    #[error("Envelope error: {0}")]
    Envelope(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for ef-app operations.
pub type AppResult<T> = Result<T, AppError>;

// Conversions from backend error types
impl From<ef_project::ProjectError> for AppError {
    fn from(err: ef_project::ProjectError) -> Self {
        AppError::Scenario(err.to_string())
    }
}

impl From<ef_core::CoreError> for AppError {
    fn from(err: ef_core::CoreError) -> Self {
        AppError::Compile(err.to_string())
    }
}

impl From<ef_sim::SimError> for AppError {
    fn from(err: ef_sim::SimError) -> Self {
        AppError::Simulation(err.to_string())
    }
}

impl From<ef_envelope::EnvelopeError> for AppError {
    fn from(err: ef_envelope::EnvelopeError) -> Self {
        AppError::Envelope(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Export(err.to_string())
    }
}
