//! Tarball integrity hashes.
//!
//! The registry publishes a SHA-1 `shasum` for every tarball it serves. The
//! cache recomputes it on every read and on every fetch.

use sha1::{Digest, Sha1};
use std::fmt;

/// A SHA-1 digest of a tarball, as published in `dist.shasum`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shasum([u8; 20]);

impl Shasum {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Compute the digest of `data`.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Self::hasher();
        hasher.update(data);
        hasher.finalize()
    }

    /// Create an incremental hasher.
    pub fn hasher() -> ShasumHasher {
        ShasumHasher(Sha1::new())
    }

    /// Parse a 40-character hex digest. Upper and lower case are accepted.
    pub fn from_hex(s: &str) -> crate::Result<Self> {
        if s.len() != 40 {
            return Err(crate::Error::InvalidHash(format!(
                "expected 40 hex chars, got {}",
                s.len()
            )));
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| crate::Error::InvalidHash(e.to_string()))?;
        Ok(Self(bytes))
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether `data` hashes to this digest.
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::compute(data) == *self
    }
}

impl fmt::Debug for Shasum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shasum({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Shasum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental SHA-1 hasher.
pub struct ShasumHasher(Sha1);

impl ShasumHasher {
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> Shasum {
        Shasum(self.0.finalize().into())
    }
}
