//! Application state shared across handlers.

use crate::replication::ReplicationHandle;
use crate::resolver::DocumentResolver;
use crate::tarballs::TarballCache;
use crate::upstream::UpstreamRegistry;
use larder_core::config::AppConfig;
use larder_metadata::DocumentStore;
use larder_storage::ObjectStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Tier decision for metadata requests.
    pub resolver: DocumentResolver,
    /// Binary store front end.
    pub tarballs: Arc<TarballCache>,
    /// The cache's own document collection.
    pub local: Arc<dyn DocumentStore>,
    /// Document collection replicated from the change feed.
    pub replica: Arc<dyn DocumentStore>,
    /// Tarball blobs.
    pub storage: Arc<dyn ObjectStore>,
    /// Authoritative registry, also the passthrough target.
    pub upstream: Arc<dyn UpstreamRegistry>,
    /// Running replication, when enabled.
    pub replication: Option<Arc<ReplicationHandle>>,
}

impl AppState {
    /// Wire the engine together over the given stores and upstream.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        local: Arc<dyn DocumentStore>,
        replica: Arc<dyn DocumentStore>,
        upstream: Arc<dyn UpstreamRegistry>,
    ) -> Self {
        let resolver = DocumentResolver::new(local.clone(), replica.clone(), upstream.clone());
        let tarballs = Arc::new(TarballCache::new(
            storage.clone(),
            upstream.clone(),
            local.clone(),
        ));

        Self {
            config: Arc::new(config),
            resolver,
            tarballs,
            local,
            replica,
            storage,
            upstream,
            replication: None,
        }
    }

    /// Attach a running replication so its status is reported.
    pub fn with_replication(mut self, handle: Arc<ReplicationHandle>) -> Self {
        self.replication = Some(handle);
        self
    }

    /// Public base URL used when rewriting tarball and info locations.
    pub fn base_url(&self) -> &str {
        self.config.server.base_url()
    }
}
