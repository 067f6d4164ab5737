//! Route configuration.

use crate::handlers;
use crate::metrics::metrics_handler;
use crate::state::AppState;
use axum::Router;
use axum::routing::{any, get};
use tower_http::trace::TraceLayer;

/// Create the application router.
///
/// Reads are served from the cache. Every other method, and every path the
/// cache doesn't know, goes to the upstream registry unchanged.
pub fn create_router(state: AppState) -> Router {
    let registry_routes = Router::new()
        .route(
            "/",
            get(handlers::welcome).fallback(handlers::passthrough),
        )
        // Search, whoami, audit and friends
        .route("/-/{*rest}", any(handlers::passthrough))
        // Tarball routes take the whole `{version}.tgz` segment since axum
        // doesn't support suffixes after a parameter. Parameters at the same
        // depth must share a name, so scoped routes reuse the unscoped ones'
        // names and their handlers read the segments positionally.
        .route(
            "/tarballs/{package}/{file}",
            get(handlers::get_tarball).fallback(handlers::passthrough),
        )
        .route(
            "/tarballs/{package}/{file}/{scoped_file}",
            get(handlers::get_scoped_tarball).fallback(handlers::passthrough),
        )
        .route(
            "/{package}",
            get(handlers::get_package).fallback(handlers::passthrough),
        )
        .route(
            "/{package}/{version}",
            get(handlers::get_version).fallback(handlers::passthrough),
        )
        .route(
            "/{package}/{version}/{scoped_version}",
            get(handlers::get_scoped_version).fallback(handlers::passthrough),
        );

    let mut router = Router::new().merge(registry_routes);

    // Conditionally add metrics endpoint based on config.
    if state.config.server.metrics_enabled {
        let metrics_routes = Router::new().route("/metrics", get(metrics_handler));
        router = router.merge(metrics_routes);
    }

    router
        .fallback(handlers::passthrough)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
