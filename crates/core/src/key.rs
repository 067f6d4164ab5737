//! Binary store keys for cached tarballs.

use std::fmt;

/// Split `@scope/name` into its scope and bare name.
pub fn split_scope(package: &str) -> (Option<&str>, &str) {
    match package.strip_prefix('@').and_then(|rest| rest.split_once('/')) {
        Some((scope, name)) => (Some(scope), name),
        None => (None, package),
    }
}

/// Key of one tarball in the binary store.
///
/// Unscoped packages map to `{name}-{version}`; scoped ones to
/// `@{scope}/{name}-{version}`, so every scope gets its own directory.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TarballKey(String);

impl TarballKey {
    /// Build a key from a full package name (`foo` or `@scope/foo`).
    pub fn new(package: &str, version: &str) -> crate::Result<Self> {
        let (scope, name) = split_scope(package);
        if package.starts_with('@') && scope.is_none() {
            return Err(crate::Error::InvalidCacheKey(format!(
                "scoped package without a name: {package}"
            )));
        }
        Self::build(scope, name, version)
    }

    /// Build a key from a scope (with or without the leading `@`) and name.
    pub fn scoped(scope: &str, name: &str, version: &str) -> crate::Result<Self> {
        let scope = scope.strip_prefix('@').unwrap_or(scope);
        Self::build(Some(scope), name, version)
    }

    fn build(scope: Option<&str>, name: &str, version: &str) -> crate::Result<Self> {
        if let Some(scope) = scope {
            check_segment("scope", scope)?;
        }
        check_segment("name", name)?;
        check_segment("version", version)?;

        Ok(Self(match scope {
            Some(scope) => format!("@{scope}/{name}-{version}"),
            None => format!("{name}-{version}"),
        }))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn check_segment(what: &str, value: &str) -> crate::Result<()> {
    let bad = value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\', '\0'])
        || value.starts_with('.');
    if bad {
        return Err(crate::Error::InvalidCacheKey(format!(
            "invalid {what}: {value:?}"
        )));
    }
    Ok(())
}

impl fmt::Debug for TarballKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TarballKey({})", self.0)
    }
}

impl fmt::Display for TarballKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unscoped_key() {
        let key = TarballKey::new("lodash", "4.17.21").unwrap();
        assert_eq!(key.as_str(), "lodash-4.17.21");
    }

    #[test]
    fn test_scoped_keys_agree() {
        let a = TarballKey::new("@babel/core", "7.0.0").unwrap();
        let b = TarballKey::scoped("babel", "core", "7.0.0").unwrap();
        let c = TarballKey::scoped("@babel", "core", "7.0.0").unwrap();
        assert_eq!(a.as_str(), "@babel/core-7.0.0");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn test_split_scope() {
        assert_eq!(split_scope("@types/node"), (Some("types"), "node"));
        assert_eq!(split_scope("express"), (None, "express"));
    }

    #[test]
    fn test_rejects_traversal() {
        assert!(TarballKey::new("..", "1.0.0").is_err());
        assert!(TarballKey::new("foo", "../1.0.0").is_err());
        assert!(TarballKey::new("@scope", "1.0.0").is_err());
        assert!(TarballKey::scoped("a/b", "c", "1.0.0").is_err());
        assert!(TarballKey::new("foo", "").is_err());
    }
}
