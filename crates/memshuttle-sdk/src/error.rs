//! SDK Error Types
//!
//! Defines error types for the memshuttle SDK.

use thiserror::Error;

/// SDK Result type alias
pub type SDKResult<T> = Result<T, SDKError>;

/// SDK errors
#[derive(Debug, Error)]
pub enum SDKError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),

    /// Short-term store or remote client error
    #[error("core error: {0}")]
    Core(#[from] memshuttle_core::Error),

    /// Invalid operation
    #[error("invalid operation: {message}")]
    InvalidOperation { message: String },
}

impl SDKError {
    /// Create an invalid operation error
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Core(e) => e.is_not_found(),
            _ => false,
        }
    }
}
