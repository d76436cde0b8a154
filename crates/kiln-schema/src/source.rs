//! Where a package's source comes from.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::Checksum;

/// Kind of source a package directive fetches from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Downloadable archive (default).
    #[default]
    Tarball,
    /// Git repository checked out at a ref.
    Git,
    /// Subversion repository checked out at a revision.
    Svn,
    /// Local directory used as-is.
    Copy,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Tarball => "tarball",
            Self::Git => "git",
            Self::Svn => "svn",
            Self::Copy => "copy",
        };
        f.write_str(s)
    }
}

/// Primary and secondary locators for one package, by source kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// Archive URL with an optional explicit mirror.
    Tarball {
        /// Canonical download URL, with any `#checksum` fragment removed.
        url: String,
        /// Explicit mirror URL from the definition, tried before `url`.
        mirror: Option<String>,
    },
    /// Git remote and the ref to check out.
    Git {
        /// Remote URL.
        url: String,
        /// Branch or tag.
        reference: String,
    },
    /// Subversion URL and revision.
    Svn {
        /// Repository URL.
        url: String,
        /// Revision number or `HEAD`.
        revision: String,
    },
    /// Local source directory.
    Copy {
        /// Directory to copy into the build workspace.
        path: PathBuf,
    },
}

impl Locator {
    /// Source kind this locator belongs to.
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::Tarball { .. } => SourceKind::Tarball,
            Self::Git { .. } => SourceKind::Git,
            Self::Svn { .. } => SourceKind::Svn,
            Self::Copy { .. } => SourceKind::Copy,
        }
    }

    /// Primary URL or path, for display.
    pub fn primary(&self) -> String {
        match self {
            Self::Tarball { url, .. } | Self::Git { url, .. } | Self::Svn { url, .. } => {
                url.clone()
            }
            Self::Copy { path } => path.display().to_string(),
        }
    }
}

/// Split a tarball URL into the bare URL and its embedded checksum fragment.
///
/// `https://example.org/foo-1.0.tar.gz#abc123` yields the URL without the
/// fragment and `Some("abc123")`. A trailing `#` with nothing after it yields
/// no checksum.
pub fn split_checksum(url: &str) -> (String, Option<Checksum>) {
    match url.rsplit_once('#') {
        Some((bare, fragment)) => (bare.to_string(), Checksum::new(fragment)),
        None => (url.to_string(), None),
    }
}

/// Extract the artifact filename from a URL: the last path segment, with any
/// query string or fragment dropped.
pub fn filename_from_url(url: &str) -> &str {
    let url = url.split(['#', '?']).next().unwrap_or_default();
    url.split('/').next_back().unwrap_or("")
}
