//! Version resolution against a package document.
//!
//! Version keys in registry documents are not guaranteed to be valid semantic
//! versions. Keys that fail to parse are ignored for `latest` and range
//! queries but can still be reached by exact lookup.

use crate::document::{PackageDocument, VersionRecord};
use semver::{Version, VersionReq};
use std::cmp::Ordering;

/// The query that selects the highest published version.
pub const LATEST: &str = "latest";

/// Parse a version key. A single leading `v` or `=` is tolerated.
pub fn parse_version(key: &str) -> Option<Version> {
    let trimmed = key.trim();
    let bare = trimmed
        .strip_prefix(|c: char| c == 'v' || c == '=')
        .unwrap_or(trimmed);
    Version::parse(bare).ok()
}

/// Whether `key` is a valid semantic version.
pub fn is_valid_version(key: &str) -> bool {
    parse_version(key).is_some()
}

/// Resolve `query` against `doc`.
///
/// In order: `latest` picks the highest valid version; an exact key match is
/// returned as-is; a `dist-tags` entry is followed; anything else is read as a
/// range and the maximum satisfying version wins.
pub fn resolve<'a>(doc: &'a PackageDocument, query: &str) -> Option<&'a VersionRecord> {
    if query == LATEST {
        return max_satisfying(doc, |_| true);
    }

    if let Some(record) = doc.versions.get(query) {
        return Some(record);
    }

    if let Some(target) = doc.dist_tag(query)
        && let Some(record) = doc.versions.get(target)
    {
        return Some(record);
    }

    let range = Range::parse(query).ok()?;
    max_satisfying(doc, |v| range.matches(v))
}

fn max_satisfying<'a>(
    doc: &'a PackageDocument,
    accept: impl Fn(&Version) -> bool,
) -> Option<&'a VersionRecord> {
    doc.versions
        .iter()
        .filter_map(|(key, record)| parse_version(key).map(|v| (v, record)))
        .filter(|(v, _)| accept(v))
        .max_by(|(a, _), (b, _)| precedence(a, b))
        .map(|(_, record)| record)
}

/// Release versions rank above every prerelease; within each group the
/// usual semantic-version order applies.
pub fn precedence(a: &Version, b: &Version) -> Ordering {
    a.pre
        .is_empty()
        .cmp(&b.pre.is_empty())
        .then_with(|| a.cmp(b))
}

/// A version range in the registry's range dialect.
///
/// Held as a set of alternatives (`||`); a version matches when any
/// alternative accepts it.
#[derive(Clone, Debug)]
pub struct Range {
    alternatives: Vec<VersionReq>,
}

impl Range {
    pub fn parse(input: &str) -> crate::Result<Self> {
        let alternatives = input
            .split("||")
            .map(|part| {
                let translated = translate(part.trim());
                VersionReq::parse(&translated)
                    .map_err(|e| crate::Error::InvalidRange(format!("{input}: {e}")))
            })
            .collect::<crate::Result<Vec<_>>>()?;
        Ok(Self { alternatives })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

/// Rewrite one `||` alternative into `VersionReq` syntax.
///
/// The dialects differ in three places: comparators are separated by
/// whitespace rather than commas, a bare version means an exact match rather
/// than a caret requirement, and `a - b` hyphen ranges exist.
fn translate(part: &str) -> String {
    if part.is_empty() || is_wildcard(part) {
        return "*".to_string();
    }

    if let Some((low, high)) = part.split_once(" - ") {
        return format!(">={}, <={}", wildcard(low.trim()), wildcard(high.trim()));
    }

    let mut comparators = Vec::new();
    let mut pending_op = String::new();
    for token in part.split_whitespace() {
        if token.chars().all(|c| "<>=~^".contains(c)) {
            pending_op.push_str(token);
            continue;
        }
        let token = format!("{}{token}", std::mem::take(&mut pending_op));
        comparators.push(comparator(&token));
    }
    comparators.join(", ")
}

fn comparator(token: &str) -> String {
    let split = token
        .find(|c: char| !"<>=~^".contains(c))
        .unwrap_or(token.len());
    let (op, version) = token.split_at(split);
    let version = version.strip_prefix('v').unwrap_or(version);

    if is_wildcard(version) {
        return "*".to_string();
    }
    let version = wildcard(version);
    if version.contains('*') {
        // VersionReq does not accept an operator in front of a wildcard.
        return version;
    }
    match op {
        "" | "=" => format!("={version}"),
        _ => format!("{op}{version}"),
    }
}

fn is_wildcard(s: &str) -> bool {
    matches!(s, "*" | "x" | "X")
}

/// Normalise `x`/`X` wildcard parts to `*`.
fn wildcard(version: &str) -> String {
    version
        .split('.')
        .map(|part| if is_wildcard(part) { "*" } else { part })
        .collect::<Vec<_>>()
        .join(".")
}
