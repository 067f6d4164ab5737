//! Core domain types and shared logic for the larder registry cache.
//!
//! This crate holds everything that does not touch the network or disk:
//! - The package document model and change-feed sequences
//! - Version resolution against a document
//! - The rewrite that points served metadata back at the cache
//! - Tarball store keys and SHA-1 integrity hashes
//! - Configuration shared by the other crates

pub mod config;
pub mod document;
pub mod error;
pub mod hash;
pub mod key;
pub mod rewrite;
pub mod version;

pub use config::AppConfig;
pub use document::{Dist, PackageDocument, Sequence, VersionRecord};
pub use error::{Error, Result};
pub use hash::{Shasum, ShasumHasher};
pub use key::{TarballKey, split_scope};
pub use rewrite::rewrite;
pub use version::{LATEST, Range, is_valid_version, parse_version, resolve};
