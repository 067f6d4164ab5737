//! Test fixtures for generating registry data.

use bytes::Bytes;
use larder_core::{Dist, PackageDocument, Shasum, VersionRecord};
use serde_json::json;

/// Base URL the mock upstream pretends to live at.
pub const UPSTREAM: &str = "http://upstream.test";

/// Generate deterministic tarball bytes for a package version.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn tarball_bytes(name: &str, version: &str) -> Bytes {
    let mut data = Vec::with_capacity(4096);
    let mut state = name
        .bytes()
        .chain(version.bytes())
        .fold(0xcbf29ce484222325u64, |h, b| {
            (h ^ u64::from(b)).wrapping_mul(0x100000001b3)
        });
    while data.len() < 4096 {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        data.extend_from_slice(&state.to_le_bytes());
    }
    Bytes::from(data)
}

/// SHA-1 of data as lowercase hex, as registries publish it.
#[allow(dead_code)]
pub fn shasum_hex(data: &[u8]) -> String {
    Shasum::compute(data).to_hex()
}

/// Upstream location of a tarball.
#[allow(dead_code)]
pub fn upstream_tarball_url(name: &str, version: &str) -> String {
    let bare = name.rsplit('/').next().unwrap_or(name);
    format!("{UPSTREAM}/{name}/-/{bare}-{version}.tgz")
}

/// A version record pointing at the mock upstream, with a correct shasum.
#[allow(dead_code)]
pub fn version_record(name: &str, version: &str) -> VersionRecord {
    let data = tarball_bytes(name, version);
    VersionRecord::new(
        version,
        Dist::new(upstream_tarball_url(name, version), shasum_hex(&data)),
    )
}

/// A document with the given versions and `latest` tag on the last one.
#[allow(dead_code)]
pub fn package_doc(name: &str, versions: &[&str]) -> PackageDocument {
    let mut doc = PackageDocument::new(name);
    for version in versions {
        doc.versions
            .insert(version.to_string(), version_record(name, version));
    }
    if let Some(last) = versions.last() {
        doc.extra
            .insert("dist-tags".to_string(), json!({ "latest": last }));
    }
    doc.extra
        .insert("description".to_string(), json!(format!("the {name} package")));
    doc
}
