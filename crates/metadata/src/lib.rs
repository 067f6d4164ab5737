//! Document store abstraction and SQLite implementation for larder.
//!
//! Each mirror (the cache's local collection and the replicated secondary
//! collection) is an independent database holding:
//! - Package documents keyed by name, with store-assigned revisions
//! - A collection-wide update sequence
//! - Replication checkpoints per change-feed source

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use models::CollectionInfo;
pub use repos::{CheckpointRepo, DocumentRepo};
pub use store::{DocumentStore, SqliteDocumentStore};

use larder_core::config::StorageConfig;
use std::sync::Arc;

/// The two document collections the cache works with.
pub struct Mirrors {
    pub local: Arc<dyn DocumentStore>,
    pub replica: Arc<dyn DocumentStore>,
}

/// Open the local and secondary mirrors under the storage directory.
pub async fn open_mirrors(config: &StorageConfig) -> MetadataResult<Mirrors> {
    let local = SqliteDocumentStore::open("local", config.local_mirror_path()).await?;
    let replica = SqliteDocumentStore::open("replica", config.replica_mirror_path()).await?;
    Ok(Mirrors {
        local: Arc::new(local),
        replica: Arc::new(replica),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_mirrors_are_independent() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            directory: temp_dir.path().to_path_buf(),
        };

        let mirrors = open_mirrors(&config).await.unwrap();
        mirrors
            .local
            .put(&larder_core::PackageDocument::new("foo"))
            .await
            .unwrap();

        assert!(mirrors.local.get("foo").await.is_ok());
        assert!(mirrors.replica.get("foo").await.unwrap_err().is_not_found());
        assert!(config.local_mirror_path().exists());
        assert!(config.replica_mirror_path().exists());
    }
}
