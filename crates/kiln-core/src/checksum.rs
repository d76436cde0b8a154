//! Checksum verification for downloaded artifacts.
//!
//! Which digests can be computed is probed once per process and recorded in
//! [`Capabilities`]. When the facility for a given checksum is missing,
//! verification succeeds without reading the file.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use kiln_schema::Checksum;
use md5::Md5;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::io::BuildLog;

/// Checksum verification failures.
#[derive(Error, Debug)]
pub enum ChecksumError {
    /// The computed digest differs from the expected one.
    #[error("checksum mismatch: {} (file) vs {expected} (expected), got {actual}", .path.display())]
    Mismatch {
        /// File that was verified.
        path: PathBuf,
        /// Checksum from the definition.
        expected: String,
        /// Checksum computed from the file contents.
        actual: String,
    },

    /// The file exists but could not be hashed.
    #[error("failed to compute checksum of {}: {source}", .path.display())]
    HashComputationFailed {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: io::Error,
    },
}

/// Digest algorithms available in this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// SHA-256 (64 hex characters).
    pub sha256: bool,
    /// MD5 (32 hex characters).
    pub md5: bool,
}

static CAPABILITIES: OnceLock<Capabilities> = OnceLock::new();

/// Probe the digest facilities once and cache the answer.
pub fn capabilities() -> Capabilities {
    *CAPABILITIES.get_or_init(|| {
        let caps = Capabilities {
            sha256: true,
            md5: true,
        };
        tracing::debug!("checksum capabilities: {caps:?}");
        caps
    })
}

/// Compute the SHA-256 hex digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn sha256_file(path: &Path) -> io::Result<String> {
    digest_file::<Sha256>(path)
}

/// Compute the MD5 hex digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn md5_file(path: &Path) -> io::Result<String> {
    digest_file::<Md5>(path)
}

fn digest_file<D: Digest>(path: &Path) -> io::Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = D::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verifies files against expected checksums.
#[derive(Debug, Clone, Copy)]
pub struct ChecksumVerifier {
    caps: Capabilities,
}

impl Default for ChecksumVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumVerifier {
    /// Verifier using the process-wide capabilities.
    pub fn new() -> Self {
        Self {
            caps: capabilities(),
        }
    }

    /// Verifier with explicit capabilities.
    pub fn with_capabilities(caps: Capabilities) -> Self {
        Self { caps }
    }

    /// Verify `path` against `expected`.
    ///
    /// A missing file or missing checksum is "nothing to check" and
    /// succeeds, as does a checksum whose digest facility is unavailable. On
    /// mismatch the diagnostic goes to the build log.
    ///
    /// # Errors
    ///
    /// Returns `ChecksumError::Mismatch` when the digests differ and
    /// `ChecksumError::HashComputationFailed` when the file cannot be read.
    pub fn verify(
        &self,
        path: &Path,
        expected: Option<&Checksum>,
        log: &BuildLog,
    ) -> Result<(), ChecksumError> {
        let Some(expected) = expected else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }

        if expected.is_md5() {
            if !self.caps.md5 {
                log.line(format!(
                    "no MD5 support; skipping checksum verification of {}",
                    path.display()
                ));
                return Ok(());
            }
        } else if !self.caps.sha256 {
            return Ok(());
        }

        let digest = if expected.is_md5() {
            md5_file(path)
        } else {
            sha256_file(path)
        };
        let actual = digest.map_err(|source| ChecksumError::HashComputationFailed {
            path: path.to_path_buf(),
            source,
        })?;

        if actual == expected.as_str() {
            return Ok(());
        }

        let err = ChecksumError::Mismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        };
        log.line("");
        log.line(&err);
        log.line("");
        Err(err)
    }
}
