//! Source retrieval.
//!
//! The locator of a [`PackageSpec`] selects exactly one variant: tarball
//! download (cache, mirror, primary URL), version-control checkout, or a
//! plain copy of a local tree. There is no fallback across variants.

mod copy;
mod tarball;
pub mod transport;
mod vcs;

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_schema::{Locator, PackageSpec};
use thiserror::Error;

use crate::cache::{CacheError, CacheStore};
use crate::checksum::{ChecksumError, ChecksumVerifier};
use crate::io::BuildLog;
use crate::io::extract::ExtractError;

pub use transport::{HttpClient, ToolClient, TransportKind};
pub use vcs::VcsTools;

/// Fetch failures. All of them are fatal to the package.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Neither curl nor wget is available.
    #[error("no HTTP client found; install curl or wget")]
    NetworkUnavailable,

    /// A download command failed.
    #[error("failed to download {url}: {reason}")]
    DownloadFailed {
        /// URL that was requested.
        url: String,
        /// What went wrong.
        reason: String,
    },

    /// The downloaded artifact did not verify.
    #[error(transparent)]
    Checksum(#[from] ChecksumError),

    /// The VCS client needed for this source is not installed.
    #[error("{0} is required to fetch this source but was not found")]
    VcsToolMissing(String),

    /// The VCS checkout exited with an error.
    #[error("checkout of {url} at {reference} failed ({status})")]
    VcsCheckoutFailed {
        /// Repository URL.
        url: String,
        /// Requested ref or revision.
        reference: String,
        /// Exit status of the VCS client.
        status: std::process::ExitStatus,
    },

    /// The archive could not be unpacked.
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    /// The cache entry could not be written.
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// A local source path does not exist.
    #[error("source path {} does not exist", .0.display())]
    SourceMissing(PathBuf),

    /// Other filesystem errors in the build workspace.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// An unpacked source tree ready for building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceTree {
    /// Root directory of the package sources.
    pub root: PathBuf,
}

/// Retrieves package sources into the build workspace.
#[derive(Debug, Clone)]
pub struct Fetcher {
    http: Option<Arc<dyn HttpClient>>,
    vcs: VcsTools,
    mirror_base: Option<String>,
    verifier: ChecksumVerifier,
}

impl Fetcher {
    /// Fetcher using `http` for downloads and the VCS clients found on `PATH`.
    pub fn new(http: Option<Arc<dyn HttpClient>>, mirror_base: Option<String>) -> Self {
        Self {
            http,
            vcs: VcsTools::detect(),
            mirror_base,
            verifier: ChecksumVerifier::new(),
        }
    }

    /// Replace the VCS client locations.
    #[must_use]
    pub fn with_vcs(mut self, vcs: VcsTools) -> Self {
        self.vcs = vcs;
        self
    }

    /// Replace the checksum verifier.
    #[must_use]
    pub fn with_verifier(mut self, verifier: ChecksumVerifier) -> Self {
        self.verifier = verifier;
        self
    }

    /// Name of the HTTP client in use, if any.
    pub fn http_name(&self) -> Option<&str> {
        self.http.as_deref().map(HttpClient::name)
    }

    /// Fetch the sources of `spec` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns a `FetchError` describing the first failure.
    pub fn fetch(
        &self,
        spec: &PackageSpec,
        dest: &Path,
        cache: &CacheStore,
        log: &BuildLog,
    ) -> Result<SourceTree, FetchError> {
        std::fs::create_dir_all(dest)?;
        tracing::debug!("fetching {} into {}", spec.name, dest.display());

        match &spec.locator {
            Locator::Tarball { url, mirror } => {
                let mirror = mirror.clone().or_else(|| self.derived_mirror(spec));
                tarball::fetch(
                    &tarball::Request {
                        name: &spec.name,
                        url,
                        mirror: mirror.as_deref(),
                        checksum: spec.checksum.as_ref(),
                        dest,
                    },
                    self.http.as_deref(),
                    &self.verifier,
                    cache,
                    log,
                )
            }
            Locator::Git { url, reference } => {
                vcs::git(self.vcs.git.as_deref(), url, reference, &dest.join(&spec.name), log)
            }
            Locator::Svn { url, revision } => {
                vcs::svn(self.vcs.svn.as_deref(), url, revision, &dest.join(&spec.name), log)
            }
            Locator::Copy { path } => copy::fetch(path, &dest.join(&spec.name), log),
        }
    }

    /// `<mirror base>/<checksum>`, when both are known.
    fn derived_mirror(&self, spec: &PackageSpec) -> Option<String> {
        let base = self.mirror_base.as_deref()?;
        let checksum = spec.checksum.as_ref()?;
        Some(format!("{}/{checksum}", base.trim_end_matches('/')))
    }
}
