//! Three-tier document resolution with write-back.
//!
//! A request is answered by the first tier that has the document: the local
//! mirror, then the replicated secondary mirror, then the upstream registry.
//! Answers from the last two tiers are written into the local mirror so the
//! next request for the same name is a local hit.

use crate::metrics;
use crate::upstream::{UpstreamError, UpstreamRegistry};
use larder_core::PackageDocument;
use larder_metadata::{DocumentStore, MetadataError};
use std::fmt;
use std::sync::Arc;

/// Which tier answered a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Local,
    Replica,
    Upstream,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Replica => "replica",
            Tier::Upstream => "upstream",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// Every tier failed; `source` is the upstream failure.
    #[error("document {name} unavailable: {source}")]
    DocumentUnavailable {
        name: String,
        #[source]
        source: UpstreamError,
    },

    #[error("failed to write {name} to the local mirror: {source}")]
    WriteBack {
        name: String,
        #[source]
        source: MetadataError,
    },
}

/// Owns the tier decision for metadata requests.
#[derive(Clone)]
pub struct DocumentResolver {
    local: Arc<dyn DocumentStore>,
    replica: Arc<dyn DocumentStore>,
    upstream: Arc<dyn UpstreamRegistry>,
}

impl DocumentResolver {
    pub fn new(
        local: Arc<dyn DocumentStore>,
        replica: Arc<dyn DocumentStore>,
        upstream: Arc<dyn UpstreamRegistry>,
    ) -> Self {
        Self {
            local,
            replica,
            upstream,
        }
    }

    /// Fetch the document for `name`, filling the local mirror on the way.
    pub async fn get_document(&self, name: &str) -> Result<PackageDocument, ResolveError> {
        self.resolve(name).await.map(|(doc, _)| doc)
    }

    /// Like [`get_document`](Self::get_document), also reporting the tier.
    #[tracing::instrument(skip_all, fields(package = %name))]
    pub async fn resolve(&self, name: &str) -> Result<(PackageDocument, Tier), ResolveError> {
        match self.local.get(name).await {
            Ok(doc) => {
                tracing::debug!(tier = "local", "document hit");
                metrics::record_resolution(Tier::Local.as_str());
                return Ok((doc, Tier::Local));
            }
            Err(e) if e.is_not_found() => tracing::trace!("not in local mirror"),
            Err(e) => tracing::warn!(error = %e, "local mirror read failed, falling through"),
        }

        match self.replica.get(name).await {
            Ok(doc) => match self.write_back(name, doc).await {
                Ok(doc) => {
                    tracing::debug!(tier = "replica", "document filled from secondary mirror");
                    metrics::record_resolution(Tier::Replica.as_str());
                    return Ok((doc, Tier::Replica));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "write-back from secondary mirror failed, trying upstream");
                }
            },
            Err(e) if e.is_not_found() => tracing::debug!("not in secondary mirror"),
            Err(e) => tracing::warn!(error = %e, "secondary mirror read failed, falling through"),
        }

        let doc = match self.upstream.get_document(name).await {
            Ok(doc) => doc,
            Err(source) => {
                metrics::DOCUMENT_FAILURES.inc();
                if source.is_not_found() {
                    tracing::debug!("package not found upstream");
                } else {
                    tracing::error!(error = %source, "upstream fetch failed");
                }
                return Err(ResolveError::DocumentUnavailable {
                    name: name.to_string(),
                    source,
                });
            }
        };

        let doc = self.write_back(name, doc).await.map_err(|source| {
            metrics::DOCUMENT_FAILURES.inc();
            tracing::error!(error = %source, "write-back from upstream failed");
            ResolveError::WriteBack {
                name: name.to_string(),
                source,
            }
        })?;
        tracing::debug!(tier = "upstream", "document filled from upstream");
        metrics::record_resolution(Tier::Upstream.as_str());
        Ok((doc, Tier::Upstream))
    }

    /// Store `doc` in the local mirror under a fresh revision and return the
    /// stored copy.
    async fn write_back(
        &self,
        name: &str,
        doc: PackageDocument,
    ) -> Result<PackageDocument, MetadataError> {
        let mut doc = doc.without_revision();
        if doc.name.is_empty() {
            doc.name = name.to_string();
        }
        self.local.put(&doc).await?;
        self.local.get(&doc.name).await
    }
}
