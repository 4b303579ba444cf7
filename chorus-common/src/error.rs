//! Error types shared by chorus crates.

use thiserror::Error;

/// Errors raised by the shared type layer.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A client supplied an out-of-range or malformed argument
    #[error("invalid argument: {0}")]
    Argument(String),

    /// An audio format field is zero or otherwise unusable
    #[error("invalid audio format: {0}")]
    Format(String),
}

/// Convenience Result type using the common Error
pub type Result<T> = std::result::Result<T, Error>;
