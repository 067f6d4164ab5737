//! Prometheus metrics for the larder server.
//!
//! Covers document resolution by tier, tarball cache outcomes and the
//! replication feed. The `/metrics` endpoint is unauthenticated; restrict it
//! at the network level if the cache is reachable from outside the team.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    self, Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Document resolution
pub static DOCUMENT_RESOLUTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "larder_document_resolutions_total",
            "Package documents resolved, by the tier that answered",
        ),
        &["tier"],
    )
    .expect("metric creation failed")
});

pub static DOCUMENT_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_document_failures_total",
        "Document requests that no tier could answer",
    )
    .expect("metric creation failed")
});

// Tarball cache
pub static TARBALL_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "larder_tarball_requests_total",
            "Tarball requests by cache outcome (hit, miss, corrupt)",
        ),
        &["result"],
    )
    .expect("metric creation failed")
});

pub static TARBALL_COALESCED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_tarball_coalesced_total",
        "Tarball misses that joined an in-flight fetch instead of starting one",
    )
    .expect("metric creation failed")
});

pub static TARBALL_BYTES_FETCHED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_tarball_bytes_fetched_total",
        "Tarball bytes downloaded from upstream",
    )
    .expect("metric creation failed")
});

pub static DOWNLOAD_COUNTER_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_download_counter_failures_total",
        "Download counter updates that could not be persisted",
    )
    .expect("metric creation failed")
});

// Replication
pub static REPLICATION_LAST_SEQ: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "larder_replication_last_seq",
        "Last change-feed sequence applied to the secondary mirror",
    )
    .expect("metric creation failed")
});

pub static REPLICATION_RETRIES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_replication_retries_total",
        "Change-feed handshakes retried after a failure",
    )
    .expect("metric creation failed")
});

pub static REPLICATION_STREAM_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "larder_replication_stream_errors_total",
        "Errors reported by the live replication stream",
    )
    .expect("metric creation failed")
});

static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry. Safe to call repeatedly.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(DOCUMENT_RESOLUTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DOCUMENT_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TARBALL_REQUESTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TARBALL_COALESCED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(TARBALL_BYTES_FETCHED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(DOWNLOAD_COUNTER_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REPLICATION_LAST_SEQ.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REPLICATION_RETRIES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REPLICATION_STREAM_ERRORS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus text exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Count a tarball request outcome.
pub fn record_tarball(result: &str) {
    TARBALL_REQUESTS.with_label_values(&[result]).inc();
}

/// Count a document resolution by tier.
pub fn record_resolution(tier: &str) {
    DOCUMENT_RESOLUTIONS.with_label_values(&[tier]).inc();
}
