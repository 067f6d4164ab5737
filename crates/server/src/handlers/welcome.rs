//! Root status endpoint.

use crate::error::{ApiError, ApiResult};
use crate::replication::ReplicationStatus;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use larder_metadata::CollectionInfo;
use serde::Serialize;

/// Welcome response.
#[derive(Debug, Serialize)]
pub struct WelcomeResponse {
    pub larder: &'static str,
    pub version: &'static str,
    /// Local mirror summary.
    pub db: CollectionInfo,
    /// Blobs held in the binary store.
    pub tarballs: usize,
    /// Absent when replication is disabled.
    pub replication: Option<ReplicationStatus>,
}

/// GET /
pub async fn welcome(State(state): State<AppState>) -> ApiResult<Json<WelcomeResponse>> {
    let (db, tarballs) = tokio::try_join!(
        async { state.local.info().await.map_err(ApiError::from) },
        async { state.tarballs.count().await.map_err(ApiError::from) },
    )?;

    Ok(Json(WelcomeResponse {
        larder: "welcome",
        version: env!("CARGO_PKG_VERSION"),
        db,
        tarballs,
        replication: state.replication.as_ref().map(|handle| handle.status()),
    }))
}
