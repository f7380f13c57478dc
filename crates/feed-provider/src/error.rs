//! Error types for the provider service

use thiserror::Error;

/// Event-source adapter failures
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Feed parameter validation failed (surfaced as a 400 upstream)
    #[error("Feed parameter validation failed: {0}")]
    Validation(String),

    /// The adapter could not register or serve the trigger
    #[error("{0}")]
    Failed(String),
}

impl AdapterError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Router call failures below the HTTP layer
///
/// Responses with error status codes are not errors here; the fire engine
/// classifies them by status. This variant only covers transport failures,
/// which are always treated as transient.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Network error reaching router: {0}")]
    Network(String),
}
