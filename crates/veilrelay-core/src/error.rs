//! Error types for `VeilRelay` core library.

use thiserror::Error;

/// Result type alias using `VeilRelay` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `VeilRelay` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed wire frame
    #[error("Invalid frame: {0}")]
    Frame(String),

    /// Frame exceeded the configured size limit
    #[error("Frame too large: {actual} bytes exceeds limit of {limit}")]
    FrameTooLarge { limit: usize, actual: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Base64 payload could not be decoded
    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
