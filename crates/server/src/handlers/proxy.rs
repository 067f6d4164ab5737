//! Passthrough to the upstream registry.
//!
//! Search, login, publish and anything else this cache doesn't serve itself
//! is forwarded unchanged.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use crate::upstream::ProxyRequest;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};

/// Any method, any path not routed elsewhere.
pub async fn passthrough(State(state): State<AppState>, req: Request) -> ApiResult<Response> {
    let (parts, body) = req.into_parts();
    let body = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read request body: {e}")))?;
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    tracing::debug!(method = %parts.method, path = %path_and_query, "proxying upstream");
    let upstream = state
        .upstream
        .proxy(ProxyRequest {
            method: parts.method,
            path_and_query,
            headers: parts.headers,
            body,
        })
        .await?;

    Ok((upstream.status, upstream.headers, Body::from(upstream.body)).into_response())
}
