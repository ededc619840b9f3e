//! Error types for the core domain

use thiserror::Error;

/// Core domain errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid ArXiv identifier: {0}")]
    InvalidArxivId(String),

    #[error("Invalid repository URL: {0}")]
    InvalidRepoUrl(String),

    #[error("Operation '{operation}' is not allowed while the session is {state}")]
    InvalidTransition { operation: &'static str, state: String },

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
