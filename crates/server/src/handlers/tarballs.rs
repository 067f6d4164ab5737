//! Tarball download endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};

/// Version part of a `{version}.tgz` path segment.
fn parse_tarball_file(file: &str) -> ApiResult<&str> {
    file.strip_suffix(".tgz")
        .filter(|version| !version.is_empty())
        .ok_or_else(|| ApiError::NotFound(format!("not a tarball: {file}")))
}

/// GET /tarballs/{name}/{version}.tgz
// Axum can't match a `{param}.tgz` segment, so the suffix is stripped here.
pub async fn get_tarball(
    State(state): State<AppState>,
    Path((name, file)): Path<(String, String)>,
) -> ApiResult<Response> {
    let version = parse_tarball_file(&file)?;
    serve_tarball(&state, name, version.to_string()).await
}

/// GET /tarballs/@{scope}/{name}/{version}.tgz
pub async fn get_scoped_tarball(
    State(state): State<AppState>,
    Path((scope, name, file)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    if !scope.starts_with('@') {
        return Err(ApiError::NotFound(format!("not a scope: {scope}")));
    }
    let version = parse_tarball_file(&file)?;
    serve_tarball(&state, format!("{scope}/{name}"), version.to_string()).await
}

async fn serve_tarball(state: &AppState, package: String, version: String) -> ApiResult<Response> {
    let doc = state.resolver.get_document(&package).await?;
    let tarball = state.tarballs.get_tarball(&doc, &version).await?;

    tracing::info!(
        package = %package,
        version = %version,
        cache = tarball.outcome.as_str(),
        size = tarball.data.len(),
        "tarball served"
    );
    // Best effort; never holds up or fails the response.
    state.tarballs.spawn_record_download(package, version);

    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, tarball.content_type().to_string()),
            (CONTENT_LENGTH, tarball.data.len().to_string()),
        ],
        tarball.data,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tarball_file() {
        assert_eq!(parse_tarball_file("1.0.0.tgz").unwrap(), "1.0.0");
        assert_eq!(parse_tarball_file("2.0.0-beta.1.tgz").unwrap(), "2.0.0-beta.1");
        assert!(parse_tarball_file("1.0.0.tar").is_err());
        assert!(parse_tarball_file(".tgz").is_err());
    }
}
