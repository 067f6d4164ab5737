//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("invalid version range: {0}")]
    InvalidRange(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("invalid cache key: {0}")]
    InvalidCacheKey(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
