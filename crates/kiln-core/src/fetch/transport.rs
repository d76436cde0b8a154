//! HTTP transport: existence probe and download, shelled out to curl or wget.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;

use super::FetchError;
use crate::io::BuildLog;

/// Capability the tarball fetcher needs from an HTTP client.
pub trait HttpClient: Send + Sync + fmt::Debug {
    /// Short name for diagnostics.
    fn name(&self) -> &str;

    /// Lightweight existence check (HEAD). Never fails, only answers.
    fn probe(&self, url: &str, log: &BuildLog) -> bool;

    /// Download `url` to `dest`, replacing it.
    ///
    /// # Errors
    ///
    /// Returns `FetchError::DownloadFailed` if the transfer fails.
    fn download(&self, url: &str, dest: &Path, log: &BuildLog) -> Result<(), FetchError>;
}

/// Supported command-line clients, in order of preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// `curl`
    Curl,
    /// `wget`
    Wget,
}

impl TransportKind {
    /// Program name looked up on `PATH`.
    pub fn program(self) -> &'static str {
        match self {
            Self::Curl => "curl",
            Self::Wget => "wget",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "curl" => Some(Self::Curl),
            "wget" => Some(Self::Wget),
            _ => None,
        }
    }

    fn probe_args(self, url: &str) -> Vec<OsString> {
        match self {
            Self::Curl => vec!["-qsILf".into(), url.into()],
            Self::Wget => vec!["-q".into(), "--spider".into(), url.into()],
        }
    }

    fn download_args(self, url: &str, dest: &Path) -> Vec<OsString> {
        match self {
            Self::Curl => vec![
                "-q".into(),
                "-fSL".into(),
                "-o".into(),
                dest.into(),
                url.into(),
            ],
            Self::Wget => vec!["-nv".into(), "-O".into(), dest.into(), url.into()],
        }
    }
}

/// An HTTP client backed by an external program.
#[derive(Debug, Clone)]
pub struct ToolClient {
    kind: TransportKind,
    program: PathBuf,
}

impl ToolClient {
    /// Client running `program` with the argument conventions of `kind`.
    pub fn new(kind: TransportKind, program: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            program: program.into(),
        }
    }

    /// Find a client on `PATH`. `forced` restricts the search to one
    /// program; an unknown name finds nothing.
    pub fn detect(forced: Option<&str>) -> Option<Self> {
        let candidates: Vec<TransportKind> = match forced {
            Some(name) => TransportKind::from_name(name).into_iter().collect(),
            None => vec![TransportKind::Curl, TransportKind::Wget],
        };

        candidates.into_iter().find_map(|kind| {
            which::which(kind.program())
                .ok()
                .map(|program| Self::new(kind, program))
        })
    }

    /// [`ToolClient::detect`] as a shared trait object.
    pub fn detect_shared(forced: Option<&str>) -> Option<Arc<dyn HttpClient>> {
        let client = Self::detect(forced)?;
        tracing::debug!("using {} at {}", client.kind.program(), client.program.display());
        Some(Arc::new(client))
    }
}

impl HttpClient for ToolClient {
    fn name(&self) -> &str {
        self.kind.program()
    }

    fn probe(&self, url: &str, log: &BuildLog) -> bool {
        let stderr = log.stdio().unwrap_or_else(|_| Stdio::null());
        Command::new(&self.program)
            .args(self.kind.probe_args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .status()
            .is_ok_and(|s| s.success())
    }

    fn download(&self, url: &str, dest: &Path, log: &BuildLog) -> Result<(), FetchError> {
        log.line(format!("-> {url}"));
        let failed = |reason: String| FetchError::DownloadFailed {
            url: url.to_string(),
            reason,
        };

        let status = Command::new(&self.program)
            .args(self.kind.download_args(url, dest))
            .stdin(Stdio::null())
            .stdout(log.stdio()?)
            .stderr(log.stdio()?)
            .status()
            .map_err(|e| failed(format!("could not run {}: {e}", self.program.display())))?;

        if status.success() {
            Ok(())
        } else {
            Err(failed(format!("{} exited with {status}", self.kind.program())))
        }
    }
}
