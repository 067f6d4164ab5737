//! Storage trait definitions.

use crate::error::StorageResult;
use async_trait::async_trait;
use bytes::Bytes;

/// A flat key → blob store.
///
/// Keys are `/`-separated relative paths. Implementations must make `put`
/// atomic: a concurrent reader sees either the old blob or the new one, never
/// a partial write.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Read a whole object. Returns `NotFound` when the key is absent.
    async fn get(&self, key: &str) -> StorageResult<Bytes>;

    /// Write an object, replacing any previous value.
    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()>;

    /// List every key under `prefix` (empty prefix lists everything).
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Short backend identifier for logs and status output.
    fn backend_name(&self) -> &'static str;

    /// Verify the backend is usable.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
