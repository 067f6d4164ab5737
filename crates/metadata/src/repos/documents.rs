//! Document repository trait.

use crate::error::MetadataResult;
use crate::models::CollectionInfo;
use async_trait::async_trait;
use larder_core::PackageDocument;

/// Whole-document reads and writes keyed by package name.
#[async_trait]
pub trait DocumentRepo: Send + Sync {
    /// Fetch a document. The returned copy carries the store's current
    /// revision. Returns `NotFound` when the name is absent.
    async fn get(&self, name: &str) -> MetadataResult<PackageDocument>;

    /// Write a document and return its new revision.
    ///
    /// Without a revision the write is an unconditional create-or-overwrite.
    /// With one it only succeeds if that revision is still current, and fails
    /// with `Conflict` otherwise.
    async fn put(&self, doc: &PackageDocument) -> MetadataResult<String>;

    /// Remove a document. Returns whether it existed.
    async fn delete(&self, name: &str) -> MetadataResult<bool>;

    /// Collection summary.
    async fn info(&self) -> MetadataResult<CollectionInfo>;
}
