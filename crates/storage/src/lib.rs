//! Binary object storage for the larder registry cache.
//!
//! Tarballs are stored as flat key → blob entries. The cache manager owns
//! integrity checks; this crate only guarantees that a write is all-or-nothing
//! and that keys cannot escape the storage root.

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use error::{StorageError, StorageResult};
pub use traits::ObjectStore;

use larder_core::config::StorageConfig;
use std::sync::Arc;

/// Open the tarball store described by `config`.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    let backend = FilesystemBackend::new(config.binary_path()).await?;
    Ok(Arc::new(backend))
}
