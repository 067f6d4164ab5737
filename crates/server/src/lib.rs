//! HTTP server and caching engine for the larder registry cache.
//!
//! This crate provides:
//! - Three-tier document resolution with write-back to the local mirror
//! - The tarball cache with integrity checks and coalesced fetches
//! - Replication of the secondary mirror from the upstream change feed
//! - The npm-compatible HTTP surface and upstream passthrough

pub mod coalesce;
pub mod error;
pub mod feed;
pub mod handlers;
pub mod metrics;
pub mod replication;
pub mod resolver;
pub mod routes;
pub mod state;
pub mod tarballs;
pub mod upstream;

pub use error::ApiError;
pub use replication::{ReplicationController, ReplicationHandle};
pub use resolver::DocumentResolver;
pub use routes::create_router;
pub use state::AppState;
pub use tarballs::TarballCache;
