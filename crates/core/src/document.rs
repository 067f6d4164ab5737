//! Registry document model.
//!
//! Only the fields the cache reasons about are typed. Everything else the
//! registry sends (`dist-tags`, `time`, `readme`, maintainers, ...) is kept in
//! the flattened `extra` maps and written back untouched.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata document for one package.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PackageDocument {
    /// Package name, including the `@scope/` prefix for scoped packages.
    #[serde(default)]
    pub name: String,
    /// Mirror revision marker. Absent on documents fetched from upstream.
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
    /// Version records keyed by version string. Keys are not guaranteed to be
    /// valid semantic versions.
    #[serde(default)]
    pub versions: BTreeMap<String, VersionRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageDocument {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a document from raw JSON bytes.
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Serialize to JSON bytes.
    pub fn to_vec(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| crate::Error::Serialization(e.to_string()))
    }

    /// Look up a `dist-tags` entry (e.g. `"next"`).
    pub fn dist_tag(&self, tag: &str) -> Option<&str> {
        self.extra
            .get("dist-tags")
            .and_then(|tags| tags.get(tag))
            .and_then(Value::as_str)
    }

    /// Drop the revision marker so the document can be written to a mirror as
    /// a plain overwrite.
    pub fn without_revision(mut self) -> Self {
        self.revision = None;
        self
    }
}

/// One published version of a package.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub dist: Dist,
    /// Number of times the cache has served this version's tarball.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub downloads: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl VersionRecord {
    pub fn new(version: impl Into<String>, dist: Dist) -> Self {
        Self {
            version: version.into(),
            dist,
            ..Self::default()
        }
    }
}

/// Distribution block of a version record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dist {
    /// Where the tarball can be downloaded.
    #[serde(default)]
    pub tarball: String,
    /// Hex SHA-1 of the tarball.
    #[serde(default)]
    pub shasum: String,
    /// Optional URL of an authoritative version record whose `dist.tarball`
    /// overrides this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Dist {
    pub fn new(tarball: impl Into<String>, shasum: impl Into<String>) -> Self {
        Self {
            tarball: tarball.into(),
            shasum: shasum.into(),
            ..Self::default()
        }
    }
}

fn is_zero(n: &u64) -> bool {
    *n == 0
}

/// A change-feed position.
///
/// Feeds report either plain integers or opaque strings with a numeric
/// prefix (`"1234-g1AAAA..."`). The raw form is kept for resuming; the
/// numeric prefix is used for progress.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Sequence(String);

impl Sequence {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The beginning of a feed.
    pub fn zero() -> Self {
        Self("0".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading integer of the sequence, or 0 when there is none.
    pub fn number(&self) -> u64 {
        let digits = self
            .0
            .find(|c: char| !c.is_ascii_digit())
            .map_or(self.0.as_str(), |end| &self.0[..end]);
        digits.parse().unwrap_or(0)
    }
}

impl From<u64> for Sequence {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sequence({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Sequence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.parse::<u64>() {
            Ok(n) => serializer.serialize_u64(n),
            Err(_) => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for Sequence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Sequence::from(n),
            Raw::Text(s) => Sequence(s),
        })
    }
}
