//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the hosting runtime.
#[derive(Error, Debug)]
pub enum Error {
    /// Validation errors (map to HTTP 400).
    #[error("validation error: {0}")]
    Validation(String),

    /// A collaborator could not produce what was asked for (map to HTTP 503).
    #[error("instance unavailable: {0}")]
    Unavailable(String),

    /// Tenant configuration is unusable for the requested operation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Outbound call failed (map to HTTP 502).
    #[error("transport error: {0}")]
    Transport(String),

    /// Internal errors (map to HTTP 500).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status code for the front door.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::Unavailable(_) => 503,
            Error::Configuration(_) => 500,
            Error::Transport(_) => 502,
            Error::Internal(_) | Error::Serialization(_) | Error::Io(_) => 500,
        }
    }

    /// JSON-RPC error code for protocol-level responses.
    pub fn jsonrpc_code(&self) -> i64 {
        match self {
            Error::Validation(_) => crate::protocol::INVALID_PARAMS,
            Error::Serialization(_) => crate::protocol::PARSE_ERROR,
            _ => crate::protocol::INTERNAL_ERROR,
        }
    }
}

// Convenience constructors
impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
