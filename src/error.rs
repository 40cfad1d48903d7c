//! Error types for the event buffer.

use thiserror::Error;

/// Main error type for buffer operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("buffer is closed")]
    Closed,

    #[error("invalid buffer config: {0}")]
    InvalidConfig(String),
}

/// Result type for buffer operations.
pub type Result<T> = std::result::Result<T, BufferError>;
