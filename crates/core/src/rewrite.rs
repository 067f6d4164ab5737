//! Rewrites upstream documents into the view served to clients.

use crate::document::PackageDocument;
use crate::version::is_valid_version;

/// URL of a tarball as served by this cache.
///
/// Scoped names keep their slash so the URL lands on the scoped tarball route.
pub fn tarball_url(base_url: &str, name: &str, version: &str) -> String {
    let base = base_url.trim_end_matches('/');
    format!("{base}/tarballs/{name}/{version}.tgz")
}

/// URL of a single version record as served by this cache.
///
/// The scope separator is percent-encoded so the name stays one path segment.
pub fn info_url(base_url: &str, name: &str, version: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let name = name.replacen('/', "%2f", 1);
    format!("{base}/{name}/{version}")
}

/// Produce the client-facing copy of `doc`.
///
/// Version keys that are not valid semantic versions are dropped, and every
/// remaining record's `dist.tarball` and `dist.info` point back at `base_url`.
/// All other fields pass through unchanged.
pub fn rewrite(doc: &PackageDocument, base_url: &str) -> PackageDocument {
    let mut out = doc.clone();
    out.versions.retain(|key, _| is_valid_version(key));

    let name = &out.name;
    for (version, record) in out.versions.iter_mut() {
        record.dist.tarball = tarball_url(base_url, name, version);
        record.dist.info = Some(info_url(base_url, name, version));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Dist, VersionRecord};

    const BASE: &str = "http://127.0.0.1:5080";

    fn foo() -> PackageDocument {
        let mut doc = PackageDocument::new("foo");
        for key in ["1.0.0", "2.0.0-beta", "bad"] {
            let dist = Dist::new(
                format!("https://registry.example/foo/-/foo-{key}.tgz"),
                "0000000000000000000000000000000000000000",
            );
            doc.versions
                .insert(key.to_string(), VersionRecord::new(key, dist));
        }
        doc.extra
            .insert("description".to_string(), serde_json::json!("a package"));
        doc
    }

    #[test]
    fn test_invalid_keys_dropped() {
        let out = rewrite(&foo(), BASE);
        let keys: Vec<_> = out.versions.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["1.0.0", "2.0.0-beta"]);
        assert!(out.versions.keys().all(|k| is_valid_version(k)));
    }

    #[test]
    fn test_urls_point_at_base() {
        let out = rewrite(&foo(), BASE);
        let record = &out.versions["1.0.0"];
        assert_eq!(record.dist.tarball, "http://127.0.0.1:5080/tarballs/foo/1.0.0.tgz");
        assert_eq!(record.dist.info.as_deref(), Some("http://127.0.0.1:5080/foo/1.0.0"));
        for record in out.versions.values() {
            assert!(record.dist.tarball.starts_with(BASE));
            assert!(record.dist.info.as_deref().unwrap().starts_with(BASE));
        }
    }

    #[test]
    fn test_other_fields_untouched() {
        let input = foo();
        let out = rewrite(&input, &format!("{BASE}/"));
        assert_eq!(out.extra, input.extra);
        assert_eq!(out.versions["1.0.0"].dist.shasum, input.versions["1.0.0"].dist.shasum);
        // input is not modified
        assert!(input.versions.contains_key("bad"));
    }

    #[test]
    fn test_scoped_urls() {
        let mut doc = PackageDocument::new("@scope/pkg");
        doc.versions
            .insert("1.0.0".to_string(), VersionRecord::new("1.0.0", Dist::default()));
        let out = rewrite(&doc, BASE);
        let record = &out.versions["1.0.0"];
        assert_eq!(record.dist.tarball, format!("{BASE}/tarballs/@scope/pkg/1.0.0.tgz"));
        assert_eq!(record.dist.info.as_deref(), Some(&*format!("{BASE}/@scope%2fpkg/1.0.0")));
    }
}
