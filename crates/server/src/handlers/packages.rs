//! Package metadata endpoints.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::header::{CACHE_CONTROL, ETAG};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use larder_core::{PackageDocument, resolve, rewrite};

/// GET /{name}
///
/// The full document, with every tarball and info URL pointing at this cache.
pub async fn get_package(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<PackageDocument>> {
    let doc = state.resolver.get_document(&name).await?;
    Ok(Json(rewrite(&doc, state.base_url())))
}

/// GET /{name}/{version}
///
/// `version` may be an exact version, a dist-tag, `latest` or a range.
pub async fn get_version(
    State(state): State<AppState>,
    Path((name, version)): Path<(String, String)>,
) -> ApiResult<Response> {
    // An unencoded `/@scope/name` lands here. `/@scope%2fname/{version}`
    // arrives decoded, with the slash already in `name`.
    if name.starts_with('@') && !name.contains('/') {
        let package = format!("{name}/{version}");
        return get_package(State(state), Path(package))
            .await
            .map(IntoResponse::into_response);
    }
    serve_version(&state, &name, &version).await
}

/// GET /{scope}/{name}/{version}, the unencoded form of a scoped version request.
pub async fn get_scoped_version(
    State(state): State<AppState>,
    Path((scope, name, version)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    if !scope.starts_with('@') {
        return Err(ApiError::NotFound(format!("no route for /{scope}/{name}/{version}")));
    }
    serve_version(&state, &format!("{scope}/{name}"), &version).await
}

async fn serve_version(state: &AppState, package: &str, query: &str) -> ApiResult<Response> {
    let doc = state.resolver.get_document(package).await?;
    let view = rewrite(&doc, state.base_url());
    let record = resolve(&view, query)
        .ok_or_else(|| ApiError::NotFound(format!("version not found: {query}")))?;

    let mut headers = HeaderMap::new();
    if let Some(revision) = &doc.revision
        && let Ok(etag) = HeaderValue::from_str(&format!("\"{revision}\""))
    {
        headers.insert(ETAG, etag);
    }
    let max_age = format!("max-age={}", state.config.server.metadata_max_age_secs);
    if let Ok(cache_control) = HeaderValue::from_str(&max_age) {
        headers.insert(CACHE_CONTROL, cache_control);
    }

    Ok((headers, Json(record)).into_response())
}
