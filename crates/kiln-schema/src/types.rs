//! Newtypes shared by definitions and the pipeline.

use serde::{Deserialize, Serialize};

/// Name of a package directive, e.g. `openssl-3.0.13`.
///
/// The name doubles as the expected top-level directory inside a source
/// archive, so it is kept verbatim (no case folding).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageName(String);

impl PackageName {
    /// Create a new package name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Return the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key prefix under which per-package build overrides are looked up.
    ///
    /// Everything up to the first `-`, uppercased: `foo-1.2` and `foo-2.0`
    /// both resolve to `FOO`, so one override covers a whole package family.
    pub fn family(&self) -> String {
        let stem = self.0.split('-').next().unwrap_or_default();
        stem.to_uppercase()
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Deref for PackageName {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for PackageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<std::path::Path> for PackageName {
    fn as_ref(&self) -> &std::path::Path {
        std::path::Path::new(&self.0)
    }
}

impl From<&str> for PackageName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Expected content digest of a downloaded artifact.
///
/// Stored lowercased so comparisons against computed hex digests are
/// case-insensitive. The digest algorithm is inferred from the length, see
/// [`Checksum::is_sha256`] and [`Checksum::is_md5`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksum(String);

impl Checksum {
    /// Create a checksum, normalizing to lowercase. Returns `None` for an
    /// empty string, which means "nothing to verify".
    pub fn new(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            None
        } else {
            Some(Self(s.to_ascii_lowercase()))
        }
    }

    /// Return the inner hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 64 hex characters: a SHA-256 digest.
    pub fn is_sha256(&self) -> bool {
        self.0.len() == 64 && self.0.chars().all(|c| c.is_ascii_hexdigit())
    }

    /// 32 hex characters: an MD5 digest.
    pub fn is_md5(&self) -> bool {
        self.0.len() == 32 && self.0.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl std::fmt::Display for Checksum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Checksum {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_strips_version() {
        assert_eq!(PackageName::new("foo-1.2").family(), "FOO");
        assert_eq!(PackageName::new("openssl-3.0.13").family(), "OPENSSL");
        assert_eq!(PackageName::new("yaml").family(), "YAML");
    }

    #[test]
    fn test_family_shared_across_versions() {
        let a = PackageName::new("ruby-3.2.0");
        let b = PackageName::new("ruby-3.3.1-preview");
        assert_eq!(a.family(), b.family());
    }

    #[test]
    fn test_checksum_normalizes_case() {
        let c = Checksum::new("ABC123").unwrap();
        assert_eq!(c.as_str(), "abc123");
    }

    #[test]
    fn test_checksum_empty_is_none() {
        assert!(Checksum::new("").is_none());
        assert!(Checksum::new("   ").is_none());
    }

    #[test]
    fn test_checksum_kind_by_length() {
        let sha = Checksum::new(&"a".repeat(64)).unwrap();
        assert!(sha.is_sha256());
        assert!(!sha.is_md5());

        let md5 = Checksum::new(&"b".repeat(32)).unwrap();
        assert!(md5.is_md5());
        assert!(!md5.is_sha256());

        let short = Checksum::new("abc123").unwrap();
        assert!(!short.is_sha256());
        assert!(!short.is_md5());
    }
}
