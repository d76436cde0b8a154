//! Run configuration.
//!
//! Built once from (lowest to highest precedence) defaults, the optional TOML
//! config file, and the process environment, then passed explicitly through
//! the pipeline. Nothing downstream reads environment variables directly:
//! the environment is captured into [`Settings::vars`] at load time so a run
//! can be reproduced in tests from a plain map.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_schema::ConditionalArg;
use serde::Deserialize;
use thiserror::Error;

use crate::paths;

/// Errors loading the configuration file.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`ConfigFile`].
    #[error("invalid config {path}: {source}")]
    Parse {
        /// Config file path.
        path: PathBuf,
        /// Deserialization failure.
        #[source]
        source: toml::de::Error,
    },
}

/// Per-family overrides that need list form and so cannot live in a single
/// environment variable. Keyed by family (`FOO` for `foo-1.2`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageOverrides {
    /// Configure command path.
    #[serde(default)]
    pub configure: Option<String>,
    /// Install prefix override.
    #[serde(default)]
    pub prefix: Option<PathBuf>,
    /// Extra configure arguments, passed verbatim (no word splitting).
    #[serde(default)]
    pub configure_opts: Vec<String>,
    /// Extra make arguments.
    #[serde(default)]
    pub make_opts: Vec<String>,
    /// Extra `make install` arguments.
    #[serde(default)]
    pub make_install_opts: Vec<String>,
    /// Extra compiler flags.
    #[serde(default)]
    pub cflags: Option<String>,
    /// Optional configure arguments with veto predicates.
    #[serde(default)]
    pub configure_args: Vec<ConditionalArg>,
}

/// On-disk configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    /// Cache root.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    /// Mirror base URL.
    #[serde(default)]
    pub mirror_url: Option<String>,
    /// Build workspace root.
    #[serde(default)]
    pub build_path: Option<PathBuf>,
    /// Built-in definitions directory.
    #[serde(default)]
    pub definitions: Option<PathBuf>,
    /// Make binary.
    #[serde(default)]
    pub make: Option<String>,
    /// Preferred HTTP client (`curl` or `wget`).
    #[serde(default)]
    pub http_client: Option<String>,
    /// Hook directories.
    #[serde(default)]
    pub hook_path: Vec<PathBuf>,
    /// Per-family overrides.
    #[serde(default)]
    pub packages: BTreeMap<String, PackageOverrides>,
}

impl ConfigFile {
    /// Read and parse a config file. A missing file yields the defaults.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Read` when the file exists but is unreadable,
    /// and `SettingsError::Parse` when it is not valid.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Cache root as configured; normalized when the transaction initializes.
    pub cache_path: Option<PathBuf>,
    /// Mirror base URL, already `None` when the mirror is skipped.
    pub mirror_url: Option<String>,
    /// Root under which the build workspace and log are created.
    pub build_root: PathBuf,
    /// Built-in definitions directory.
    pub definitions_dir: Option<PathBuf>,
    /// Preferred HTTP client name.
    pub http_client: Option<String>,
    /// Hook directories, searched in order.
    pub hook_path: Vec<PathBuf>,
    /// External hook discovery command.
    pub hook_command: Option<String>,
    /// Keep the build workspace and log after success.
    pub keep_build_tree: bool,
    /// Stream the build log to the terminal.
    pub verbose: bool,
    /// Make binary.
    pub make: String,
    /// Snapshot of the environment (flat per-family overrides live here).
    pub vars: BTreeMap<String, String>,
    /// Per-family list overrides from the config file.
    pub packages: BTreeMap<String, PackageOverrides>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_parts(BTreeMap::new(), ConfigFile::default())
    }
}

impl Settings {
    /// Load from the process environment and the config file it points to.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the config file exists but is invalid.
    pub fn load() -> Result<Self, SettingsError> {
        let vars: BTreeMap<String, String> = std::env::vars().collect();
        let file = match paths::config_file(&vars) {
            Some(path) => ConfigFile::load(&path)?,
            None => ConfigFile::default(),
        };
        Ok(Self::from_parts(vars, file))
    }

    /// Build settings from an environment snapshot and a parsed config file.
    /// Environment values win over file values.
    pub fn from_parts(vars: BTreeMap<String, String>, file: ConfigFile) -> Self {
        let get = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();
        let flag = |key: &str| get(key).is_some_and(|v| v != "0" && v != "false");

        let mirror_url = if flag("KILN_SKIP_MIRROR") {
            None
        } else {
            get("KILN_MIRROR_URL").or(file.mirror_url)
        };

        let mut hook_path: Vec<PathBuf> = get("KILN_HOOK_PATH")
            .map(|v| std::env::split_paths(&v).collect())
            .unwrap_or_default();
        hook_path.extend(file.hook_path);

        Self {
            cache_path: get("KILN_CACHE_PATH").map(PathBuf::from).or(file.cache_path),
            mirror_url,
            build_root: get("KILN_BUILD_PATH")
                .map(PathBuf::from)
                .or(file.build_path)
                .unwrap_or_else(|| paths::default_build_root(&vars)),
            definitions_dir: get("KILN_DEFINITIONS")
                .map(PathBuf::from)
                .or(file.definitions)
                .or_else(paths::default_definitions_dir),
            http_client: get("KILN_HTTP_CLIENT").or(file.http_client),
            hook_path,
            hook_command: get("KILN_HOOK_COMMAND"),
            keep_build_tree: flag("KILN_KEEP"),
            verbose: flag("KILN_VERBOSE"),
            make: get("MAKE").or(file.make).unwrap_or_else(|| "make".to_string()),
            packages: file.packages,
            vars,
        }
    }

    /// Look up a captured environment variable. Empty values count as unset.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let s = Settings::from_parts(BTreeMap::new(), ConfigFile::default());
        assert_eq!(s.make, "make");
        assert!(s.cache_path.is_none());
        assert!(s.mirror_url.is_none());
        assert!(!s.keep_build_tree);
        assert!(!s.verbose);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = ConfigFile {
            mirror_url: Some("https://file.example.org".into()),
            make: Some("bmake".into()),
            ..ConfigFile::default()
        };
        let s = Settings::from_parts(
            vars(&[("KILN_MIRROR_URL", "https://env.example.org"), ("KILN_KEEP", "1")]),
            file,
        );
        assert_eq!(s.mirror_url.as_deref(), Some("https://env.example.org"));
        assert_eq!(s.make, "bmake");
        assert!(s.keep_build_tree);
    }

    #[test]
    fn test_skip_mirror() {
        let s = Settings::from_parts(
            vars(&[
                ("KILN_MIRROR_URL", "https://mirror.example.org"),
                ("KILN_SKIP_MIRROR", "1"),
            ]),
            ConfigFile::default(),
        );
        assert!(s.mirror_url.is_none());
    }

    #[test]
    fn test_empty_env_is_unset() {
        let s = Settings::from_parts(vars(&[("MAKE", ""), ("KILN_KEEP", "0")]), ConfigFile::default());
        assert_eq!(s.make, "make");
        assert!(!s.keep_build_tree);
        assert!(s.var("MAKE").is_none());
    }

    #[test]
    fn test_hook_path_split() {
        let s = Settings::from_parts(vars(&[("KILN_HOOK_PATH", "/a:/b")]), ConfigFile::default());
        assert_eq!(s.hook_path, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn test_config_file_packages() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            cache_path = "/var/cache/kiln"

            [packages.RUBY]
            configure_opts = ["--with-opt-dir=/opt/a b"]
            make_opts = ["V=1"]
            "#,
        )
        .unwrap();
        let file = ConfigFile::load(&path).unwrap();
        assert_eq!(file.cache_path, Some(PathBuf::from("/var/cache/kiln")));
        let ruby = &file.packages["RUBY"];
        assert_eq!(ruby.configure_opts, vec!["--with-opt-dir=/opt/a b"]);
        assert_eq!(ruby.make_opts, vec!["V=1"]);
    }

    #[test]
    fn test_missing_config_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let file = ConfigFile::load(&dir.path().join("absent.toml")).unwrap();
        assert!(file.packages.is_empty());
    }

    #[test]
    fn test_invalid_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "unknown_key = 1").unwrap();
        assert!(matches!(
            ConfigFile::load(&path),
            Err(SettingsError::Parse { .. })
        ));
    }
}
