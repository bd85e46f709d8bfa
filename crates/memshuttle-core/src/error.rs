//! Error types for memshuttle-core.

use thiserror::Error;

/// Result type alias using memshuttle-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for memshuttle operations
#[derive(Error, Debug)]
pub enum Error {
    // Store errors
    #[error("Store lock poisoned")]
    LockPoisoned,

    // Remote service errors
    #[error("Remote resource not found: {0}")]
    NotFound(String),

    #[error("Remote API error {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Side-store (similarity / graph) errors
    #[error("Side store error: {0}")]
    SideStore(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a remote status error
    pub fn remote(status: u16, body: impl Into<String>) -> Self {
        Self::Remote {
            status,
            body: body.into(),
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Only non-2xx responses and transport failures are retried; a 404 or a
    /// malformed success payload is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote { .. } | Self::Transport(_))
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
