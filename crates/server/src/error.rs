//! API error types.

use crate::resolver::ResolveError;
use crate::tarballs::TarballError;
use crate::upstream::UpstreamError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Error code for programmatic handling.
    pub code: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Tarball(#[from] TarballError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("metadata error: {0}")]
    Metadata(#[from] larder_metadata::MetadataError),

    #[error("storage error: {0}")]
    Storage(#[from] larder_storage::StorageError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Resolve(ResolveError::DocumentUnavailable { .. }) => "document_unavailable",
            Self::Resolve(ResolveError::WriteBack { .. }) => "write_back_failed",
            Self::Tarball(TarballError::VersionNotFound { .. }) => "version_not_found",
            Self::Tarball(TarballError::Unavailable { .. }) => "tarball_unavailable",
            Self::Upstream(_) => "upstream_error",
            Self::Metadata(_) => "metadata_error",
            Self::Storage(_) => "storage_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Resolve(ResolveError::DocumentUnavailable { source, .. })
                if source.is_not_found() =>
            {
                StatusCode::NOT_FOUND
            }
            Self::Tarball(TarballError::VersionNotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Upstream(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Metadata(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Storage(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_not_found_maps_to_404() {
        let err = ApiError::from(ResolveError::DocumentUnavailable {
            name: "nope".to_string(),
            source: UpstreamError::NotFound {
                url: "http://upstream/nope".to_string(),
            },
        });
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "document_unavailable");
    }

    #[test]
    fn test_upstream_failure_maps_to_500() {
        let err = ApiError::from(ResolveError::DocumentUnavailable {
            name: "foo".to_string(),
            source: UpstreamError::Status {
                url: "http://upstream/foo".to_string(),
                status: 502,
            },
        });
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_tarball_errors() {
        let missing = ApiError::from(TarballError::VersionNotFound {
            package: "foo".to_string(),
            version: "9.9.9".to_string(),
        });
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let unavailable = ApiError::from(TarballError::Unavailable {
            key: "foo-1.0.0".to_string(),
            reason: "shasum mismatch".to_string(),
        });
        assert_eq!(unavailable.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(unavailable.code(), "tarball_unavailable");
    }

    #[test]
    fn test_version_not_found_message() {
        let err = ApiError::NotFound("version not found: 3.0.0".to_string());
        assert_eq!(err.to_string(), "version not found: 3.0.0");
    }
}
