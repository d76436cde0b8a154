//! Content cache for downloaded artifacts.
//!
//! Keyed by artifact filename. A cached file is only handed out after it
//! passes checksum verification, so a filename collision with different
//! content falls through to the network instead of being reused. Entries are
//! written with a rename, which replaces any stale file atomically.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kiln_schema::Checksum;
use thiserror::Error;

use crate::checksum::ChecksumVerifier;
use crate::io::BuildLog;

/// Cache population failures.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The artifact could not be moved into the cache or linked back.
    #[error("failed to write cache entry {}: {source}", .path.display())]
    WriteFailed {
        /// Cache entry being written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Cache rooted at an optional directory. Without a root every lookup misses
/// and every store is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStore {
    root: Option<PathBuf>,
}

impl CacheStore {
    /// Cache rooted at `raw` after normalization, see [`CacheStore::normalize`].
    pub fn new(raw: Option<&Path>) -> Self {
        Self {
            root: raw.and_then(Self::normalize),
        }
    }

    /// A cache that never hits.
    pub fn disabled() -> Self {
        Self { root: None }
    }

    /// Strip trailing separators and disable roots that do not exist.
    pub fn normalize(raw: &Path) -> Option<PathBuf> {
        let text = raw.to_string_lossy();
        let trimmed = text.trim_end_matches('/');
        let path = if trimmed.is_empty() && text.starts_with('/') {
            PathBuf::from("/")
        } else {
            PathBuf::from(trimmed)
        };

        if path.as_os_str().is_empty() || !path.is_dir() {
            tracing::debug!("cache root {} unavailable; caching disabled", raw.display());
            return None;
        }
        Some(path)
    }

    /// Normalized root, if caching is enabled.
    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Whether a cache root is configured.
    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    /// Path of a verified cache entry for `filename`, or `None` when the
    /// caller has to fetch it. Never fails.
    pub fn lookup(
        &self,
        filename: &str,
        checksum: Option<&Checksum>,
        verifier: &ChecksumVerifier,
        log: &BuildLog,
    ) -> Option<PathBuf> {
        let entry = self.root.as_ref()?.join(filename);
        if !entry.is_file() {
            return None;
        }

        match verifier.verify(&entry, checksum, log) {
            Ok(()) => {
                log.line(format!("using cached {}", entry.display()));
                Some(entry)
            }
            Err(e) => {
                log.line(format!("ignoring cached {}: {e}", entry.display()));
                tracing::warn!("cached {} rejected: {e}", entry.display());
                None
            }
        }
    }

    /// Move a freshly downloaded `source` into the cache under `filename`
    /// and leave a symlink to the entry at `source`.
    ///
    /// Within one filesystem this is a single rename. Across filesystems the
    /// file is copied to a temporary name inside the cache root first, so a
    /// partially copied entry never carries the real filename.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::WriteFailed` if the entry cannot be written or
    /// the symlink cannot be created.
    pub fn store(&self, filename: &str, source: &Path, log: &BuildLog) -> Result<(), CacheError> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let entry = root.join(filename);
        let failed = |source: io::Error| CacheError::WriteFailed {
            path: entry.clone(),
            source,
        };

        if fs::rename(source, &entry).is_err() {
            let staging = root.join(format!(".{filename}.{}.part", std::process::id()));
            if let Err(e) = fs::copy(source, &staging).and_then(|_| fs::rename(&staging, &entry)) {
                let _ = fs::remove_file(&staging);
                return Err(failed(e));
            }
            fs::remove_file(source).map_err(failed)?;
        }

        link(&entry, source).map_err(failed)?;
        log.line(format!("cached {}", entry.display()));
        Ok(())
    }
}

/// Create `at` as a reference to `target`.
#[cfg(unix)]
pub(crate) fn link(target: &Path, at: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, at)
}

#[cfg(not(unix))]
pub(crate) fn link(target: &Path, at: &Path) -> io::Result<()> {
    fs::copy(target, at).map(|_| ())
}
