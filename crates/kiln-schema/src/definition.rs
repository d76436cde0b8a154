//! TOML definition parsing
//!
//! A definition is an ordered list of package directives:
//!
//! ```toml
//! [[package]]
//! name = "yaml-0.2.5"
//! url = "https://example.org/yaml-0.2.5.tar.gz#c642ae9b..."
//!
//! [[package]]
//! name = "ruby-3.3.0"
//! source = "git"
//! url = "https://github.com/ruby/ruby.git"
//! ref = "v3_3_0"
//! build = ["autoconf", "standard"]
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::{Locator, SourceKind, split_checksum};
use crate::types::{Checksum, PackageName};

/// Errors that can occur when loading or parsing a definition.
#[derive(Error, Debug)]
pub enum DefinitionError {
    /// Neither a file at that path nor a built-in definition by that name.
    #[error("definition not found: {0}")]
    NotFound(String),

    /// An I/O error occurred while reading the definition file.
    #[error("failed to read definition {path}: {source}")]
    Io {
        /// File that could not be read.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be deserialized.
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A directive is structurally valid TOML but semantically incomplete.
    #[error("invalid package directive '{name}': {reason}")]
    Invalid {
        /// Name of the offending directive.
        name: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The definition contains no package directives.
    #[error("definition contains no packages")]
    Empty,
}

/// An optional configure argument that a predicate can veto.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalArg {
    /// The argument itself, e.g. `--with-openssl-dir=/opt/openssl`.
    pub arg: String,
    /// Shell command; when it exits 0 the argument is dropped.
    #[serde(default)]
    pub skip_if: Option<String>,
    /// Flag prefix; when any resolved configure flag starts with it the
    /// argument is dropped.
    #[serde(default)]
    pub skip_if_flag: Option<String>,
}

/// One package directive as it appears on disk.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPackage {
    name: String,
    #[serde(default)]
    source: SourceKind,
    url: String,
    #[serde(default, rename = "ref")]
    reference: Option<String>,
    #[serde(default)]
    mirror: Option<String>,
    #[serde(default)]
    build: Vec<String>,
    #[serde(default)]
    only_if: Option<String>,
    #[serde(default)]
    configure_args: Vec<ConditionalArg>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct RawDefinition {
    #[serde(default)]
    package: Vec<RawPackage>,
}

/// One unit of fetch + build + install work. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Package name, also the expected source directory name.
    pub name: PackageName,
    /// Primary and secondary locators.
    pub locator: Locator,
    /// Expected checksum, taken from the tarball URL fragment.
    pub checksum: Option<Checksum>,
    /// Strategy names, executed in order.
    pub build: Vec<String>,
    /// Shell predicate gating the whole directive.
    pub only_if: Option<String>,
    /// Optional configure arguments contributed by the definition.
    pub configure_args: Vec<ConditionalArg>,
    /// Convenience symlinks `alias -> target` inside `<prefix>/bin`.
    pub aliases: BTreeMap<String, String>,
}

/// The name becomes a directory under the build workspace, so `.`, `..` and
/// anything with a separator would resolve somewhere else.
fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

impl PackageSpec {
    /// Source kind, which selects the fetcher.
    pub fn source_kind(&self) -> SourceKind {
        self.locator.kind()
    }

    fn from_raw(raw: RawPackage) -> Result<Self, DefinitionError> {
        let invalid = |reason: &str| DefinitionError::Invalid {
            name: raw.name.clone(),
            reason: reason.to_string(),
        };

        if raw.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if !is_single_component(&raw.name) {
            return Err(invalid("name must be a single path component"));
        }
        if raw.url.trim().is_empty() {
            return Err(invalid("url is empty"));
        }

        let mut checksum = None;
        let locator = match raw.source {
            SourceKind::Tarball => {
                let (url, sum) = split_checksum(&raw.url);
                checksum = sum;
                Locator::Tarball {
                    url,
                    mirror: raw.mirror.clone(),
                }
            }
            SourceKind::Git => Locator::Git {
                url: raw.url.clone(),
                reference: raw
                    .reference
                    .clone()
                    .ok_or_else(|| invalid("git source requires 'ref'"))?,
            },
            SourceKind::Svn => Locator::Svn {
                url: raw.url.clone(),
                revision: raw
                    .reference
                    .clone()
                    .ok_or_else(|| invalid("svn source requires 'ref'"))?,
            },
            SourceKind::Copy => Locator::Copy {
                path: PathBuf::from(&raw.url),
            },
        };

        if raw.mirror.is_some() && raw.source != SourceKind::Tarball {
            return Err(invalid("'mirror' only applies to tarball sources"));
        }

        let build = if raw.build.is_empty() {
            vec![crate::DEFAULT_STRATEGY.to_string()]
        } else {
            raw.build
        };

        Ok(Self {
            name: PackageName::new(raw.name),
            locator,
            checksum,
            build,
            only_if: raw.only_if,
            configure_args: raw.configure_args,
            aliases: raw.aliases,
        })
    }
}

/// An ordered sequence of package directives describing one buildable version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    /// Where the definition was loaded from, if it came from disk.
    pub path: Option<PathBuf>,
    /// Package directives in installation order.
    pub packages: Vec<PackageSpec>,
}

impl Definition {
    /// Parse a definition from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError::Parse` for malformed TOML,
    /// `DefinitionError::Invalid` for incomplete directives, and
    /// `DefinitionError::Empty` when no directives are present.
    pub fn parse(content: &str) -> Result<Self, DefinitionError> {
        let raw: RawDefinition = toml::from_str(content)?;
        if raw.package.is_empty() {
            return Err(DefinitionError::Empty);
        }
        let packages = raw
            .package
            .into_iter()
            .map(PackageSpec::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            path: None,
            packages,
        })
    }

    /// Parse a definition from a TOML file on disk.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError::Io` if the file cannot be read, otherwise
    /// the same errors as [`Definition::parse`].
    pub fn from_file(path: &Path) -> Result<Self, DefinitionError> {
        let content = fs::read_to_string(path).map_err(|source| DefinitionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut def = Self::parse(&content)?;
        def.path = Some(path.to_path_buf());
        Ok(def)
    }

    /// Resolve a definition argument to a file.
    ///
    /// An existing path wins. Otherwise the argument is treated as a name in
    /// `definitions_dir`, with or without a `.toml` extension.
    ///
    /// # Errors
    ///
    /// Returns `DefinitionError::NotFound` when nothing matches.
    pub fn locate(arg: &str, definitions_dir: Option<&Path>) -> Result<PathBuf, DefinitionError> {
        let direct = PathBuf::from(arg);
        if direct.is_file() {
            return Ok(direct);
        }
        if let Some(dir) = definitions_dir {
            if !arg.contains('/') {
                for candidate in [dir.join(arg), dir.join(format!("{arg}.toml"))] {
                    if candidate.is_file() {
                        return Ok(candidate);
                    }
                }
            }
        }
        Err(DefinitionError::NotFound(arg.to_string()))
    }

    /// Names of the built-in definitions in `dir`, sorted.
    pub fn list(dir: &Path) -> Vec<String> {
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_file())
            .filter_map(|e| {
                let path = e.path();
                let stem = path.file_stem()?.to_string_lossy().to_string();
                (path.extension().is_some_and(|x| x == "toml")).then_some(stem)
            })
            .collect();
        names.sort();
        names
    }
}
