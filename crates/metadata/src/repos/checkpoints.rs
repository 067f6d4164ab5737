//! Replication checkpoint repository trait.

use crate::error::MetadataResult;
use async_trait::async_trait;
use larder_core::Sequence;

/// Per-source replication cursors.
#[async_trait]
pub trait CheckpointRepo: Send + Sync {
    /// Last sequence applied from `source`, if replication ever ran.
    async fn checkpoint(&self, source: &str) -> MetadataResult<Option<Sequence>>;

    /// Record progress through `source`'s change feed.
    async fn set_checkpoint(&self, source: &str, seq: &Sequence) -> MetadataResult<()>;
}
