//! Top-level error for an installation run.

use std::path::PathBuf;

use kiln_schema::DefinitionError;
use thiserror::Error;

use crate::builder::BuildError;
use crate::fetch::FetchError;
use crate::hooks::HookError;
use crate::settings::SettingsError;

/// Everything that can abort an installation run.
///
/// Every variant is fatal: there is no per-package recovery, and the binary
/// maps all of them to exit status 1.
#[derive(Error, Debug)]
pub enum InstallError {
    /// The definition could not be located or parsed.
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    /// The configuration file could not be read.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// A source could not be fetched, verified, cached or extracted.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// A build strategy failed or was not registered.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// A before/after hook failed.
    #[error(transparent)]
    Hook(#[from] HookError),

    /// The build workspace or log file could not be created.
    #[error("failed to prepare workspace {path}: {source}")]
    Workspace {
        /// Path that could not be created.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The user declined to overwrite an existing prefix.
    #[error("installation of {0} aborted")]
    Declined(PathBuf),

    /// Any other I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InstallError {
    /// Whether this is a configuration problem detected before any workspace
    /// was created.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Definition(_)
                | Self::Settings(_)
                | Self::Declined(_)
                | Self::Build(BuildError::UnknownStrategy { .. })
        )
    }
}
