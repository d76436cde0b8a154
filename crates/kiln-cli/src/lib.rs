//! kiln - build and install software from source definitions
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
//!
//! # Overview
//!
//! `kiln <definition> <prefix>` reads a definition (an ordered list of
//! packages), downloads and verifies each source, builds it with the
//! strategies the definition names and installs everything into `<prefix>`.
//! The pipeline lives in `kiln-core`; this crate parses arguments, asks
//! before overwriting an existing prefix, renders progress and maps the
//! outcome to an exit status.
//!
//! # Directory Layout
//!
//! ```text
//! $TMPDIR/
//! ├── kiln.<run id>/       # build workspace, removed on success
//! └── kiln.<run id>.log    # build log, removed on success
//! <prefix>/                # install target
//! ```

pub mod cmd;
pub mod ui;

use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "kiln")]
#[command(author, version = env!("KILN_VERSION"), about = "kiln - build and install software from source definitions")]
pub struct Cli {
    /// Do not remove the build directory and log after installing
    #[arg(short, long)]
    pub keep: bool,

    /// Stream the build log to stderr while building
    #[arg(short, long)]
    pub verbose: bool,

    /// Install even if the prefix already exists
    #[arg(short, long)]
    pub force: bool,

    /// List the built-in definitions
    #[arg(long, conflicts_with_all = ["definition", "prefix"])]
    pub definitions: bool,

    /// Definition file, or the name of a built-in definition
    #[arg(required_unless_present = "definitions")]
    pub definition: Option<String>,

    /// Installation prefix
    #[arg(required_unless_present = "definitions")]
    pub prefix: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_install() {
        let cli = Cli::try_parse_from(["kiln", "-kv", "foo-1.0", "/opt/foo"]).unwrap();
        assert!(cli.keep);
        assert!(cli.verbose);
        assert!(!cli.force);
        assert_eq!(cli.definition.as_deref(), Some("foo-1.0"));
        assert_eq!(cli.prefix, Some(PathBuf::from("/opt/foo")));
    }

    #[test]
    fn test_parse_definitions() {
        let cli = Cli::try_parse_from(["kiln", "--definitions"]).unwrap();
        assert!(cli.definitions);
        assert_eq!(cli.definition, None);
    }

    #[test]
    fn test_missing_prefix_rejected() {
        assert!(Cli::try_parse_from(["kiln", "foo-1.0"]).is_err());
        assert!(Cli::try_parse_from(["kiln", "--definitions", "foo-1.0"]).is_err());
    }
}
