//! Error types for Tollgate.

use thiserror::Error;

/// Main error type for Tollgate operations.
///
/// Rate-limit and capacity rejections are not errors; they are reported as a
/// `false` admission decision.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// The rate limiter was constructed without a cancellation token
    #[error("Invalid context: a cancellation token is required")]
    InvalidContext,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
