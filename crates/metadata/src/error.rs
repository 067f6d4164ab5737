//! Metadata store error types.

use thiserror::Error;

/// Document store operation errors.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("revision conflict on {name}: expected {expected}, current {current}")]
    Conflict {
        name: String,
        expected: String,
        current: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MetadataError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MetadataError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MetadataError::Conflict { .. })
    }
}

impl From<larder_core::Error> for MetadataError {
    fn from(e: larder_core::Error) -> Self {
        MetadataError::Serialization(e.to_string())
    }
}

/// Result type for metadata operations.
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
