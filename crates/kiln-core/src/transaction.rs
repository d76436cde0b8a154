//! The installation transaction.
//!
//! One transaction wraps a whole run. [`Transaction::initialize`] creates
//! the build workspace and the log; [`Transaction::run`] executes the body
//! and then always resolves the transaction exactly once:
//!
//! - **Committed**: directories under the prefix, and under every
//!   per-package prefix override, lose their group/world write bits, then the workspace and log are removed unless the keep flag is set.
//! - **Failed**: the workspace is kept for inspection when it has content and
//!   removed when empty. The log is always kept and referenced by the
//!   [`Failure`] summary.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::cache::CacheStore;
use crate::error::InstallError;
use crate::io::BuildLog;
use crate::paths;
use crate::settings::Settings;

/// Lines of the log shown in a failure summary.
const SUMMARY_TAIL_LINES: usize = 10;

/// Paths and flags of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallContext {
    /// Name the installed version is reported under.
    pub version_name: String,
    /// Target install directory.
    pub prefix_path: PathBuf,
    /// Build workspace, unique to this run.
    pub build_path: PathBuf,
    /// Build log, unique to this run.
    pub log_path: PathBuf,
    /// Keep the workspace and log after success.
    pub keep_build_tree: bool,
    /// Stream the log to the terminal while running.
    pub verbose: bool,
}

impl InstallContext {
    /// Allocate workspace and log paths under the configured build root,
    /// keyed by timestamp and process id.
    pub fn new(settings: &Settings, version_name: impl Into<String>, prefix: impl Into<PathBuf>) -> Self {
        let id = paths::run_id();
        Self {
            version_name: version_name.into(),
            prefix_path: prefix.into(),
            build_path: paths::build_path(&settings.build_root, &id),
            log_path: paths::log_path(&settings.build_root, &id),
            keep_build_tree: settings.keep_build_tree,
            verbose: settings.verbose,
        }
    }
}

/// A successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installed {
    /// Name the version was installed under.
    pub version_name: String,
    /// Where it was installed.
    pub prefix: PathBuf,
    /// Workspace and log, when kept on request.
    pub kept: Option<(PathBuf, PathBuf)>,
}

/// A failed run.
#[derive(Debug)]
pub struct Failure {
    /// What aborted the run.
    pub error: InstallError,
    /// Workspace kept for inspection, if it had any content.
    pub build_path: Option<PathBuf>,
    /// The build log; never removed on failure.
    pub log_path: PathBuf,
    /// Last lines of the log, if it is non-empty.
    pub log_tail: Option<String>,
}

impl Failure {
    /// Multi-line message for the user's terminal.
    pub fn summary(&self) -> String {
        let mut out = format!("error: {}\n", self.error);
        if let Some(path) = &self.build_path {
            let _ = writeln!(out, "\nInspect or clean up the build workspace at {}", path.display());
        }
        let _ = writeln!(out, "Results logged to {}", self.log_path.display());
        if let Some(tail) = &self.log_tail {
            let _ = write!(out, "\nLast lines of the log:\n\n{tail}\n");
        }
        out
    }
}

/// How a transaction ended.
#[derive(Debug)]
pub enum Outcome {
    /// Every step succeeded.
    Committed(Installed),
    /// A step failed; nothing more was attempted.
    Failed(Failure),
}

impl Outcome {
    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Committed(_) => 0,
            Self::Failed(_) => 1,
        }
    }

    /// Whether the run succeeded.
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

/// An initialized installation transaction.
#[derive(Debug)]
pub struct Transaction {
    ctx: InstallContext,
    log: BuildLog,
    cache: CacheStore,
    extra_prefixes: Vec<PathBuf>,
}

impl Transaction {
    /// Create the workspace and log for `ctx` and normalize the cache root.
    ///
    /// # Errors
    ///
    /// Returns `InstallError::Workspace` if the workspace already exists or
    /// either path cannot be created.
    pub fn initialize(ctx: InstallContext, cache_root: Option<&Path>) -> Result<Self, InstallError> {
        let workspace = |path: &Path| {
            let path = path.to_path_buf();
            move |source: io::Error| InstallError::Workspace { path, source }
        };

        if let Some(parent) = ctx.build_path.parent() {
            fs::create_dir_all(parent).map_err(workspace(parent))?;
        }
        fs::create_dir(&ctx.build_path).map_err(workspace(&ctx.build_path))?;

        let log = match BuildLog::create(&ctx.log_path) {
            Ok(log) => log,
            Err(e) => {
                let _ = fs::remove_dir(&ctx.build_path);
                return Err(workspace(&ctx.log_path)(e));
            }
        };

        tracing::debug!(
            "workspace {} log {}",
            ctx.build_path.display(),
            ctx.log_path.display()
        );
        Ok(Self {
            ctx,
            log,
            cache: CacheStore::new(cache_root),
            extra_prefixes: Vec::new(),
        })
    }

    /// The run's paths and flags.
    pub fn context(&self) -> &InstallContext {
        &self.ctx
    }

    /// The build log.
    pub fn log(&self) -> &BuildLog {
        &self.log
    }

    /// The cache, normalized once at initialization.
    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Record a new version name and prefix, e.g. after a hook renamed the
    /// version. Permission hardening applies to the new prefix.
    pub fn retarget(&mut self, version_name: impl Into<String>, prefix: impl Into<PathBuf>) {
        self.ctx.version_name = version_name.into();
        self.ctx.prefix_path = prefix.into();
    }

    /// Record a directory a package installed into besides the run prefix,
    /// so commit hardens it too.
    pub fn record_prefix(&mut self, prefix: impl Into<PathBuf>) {
        let prefix = prefix.into();
        if prefix != self.ctx.prefix_path && !self.extra_prefixes.contains(&prefix) {
            self.extra_prefixes.push(prefix);
        }
    }

    /// Every directory hardened at commit: the run prefix first.
    pub fn prefixes(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.ctx.prefix_path.as_path())
            .chain(self.extra_prefixes.iter().map(PathBuf::as_path))
    }

    /// Run `body` and resolve the transaction from its result. Resolution
    /// happens whichever step of the body failed.
    pub fn run<F>(mut self, body: F) -> Outcome
    where
        F: FnOnce(&mut Self) -> Result<(), InstallError>,
    {
        let result = body(&mut self);
        self.resolve(result)
    }

    /// Commit on `Ok`, fail on `Err`.
    pub fn resolve(self, result: Result<(), InstallError>) -> Outcome {
        match result {
            Ok(()) => self.commit(),
            Err(e) => self.fail(e),
        }
    }

    fn commit(self) -> Outcome {
        let hardened = self.prefixes().try_for_each(harden_permissions);
        if let Err(e) = hardened {
            return self.fail(e.into());
        }

        let kept = if self.ctx.keep_build_tree {
            Some((self.ctx.build_path.clone(), self.ctx.log_path.clone()))
        } else {
            remove_quietly(&self.ctx.build_path, true);
            remove_quietly(&self.ctx.log_path, false);
            None
        };

        tracing::info!(
            "installed {} to {}",
            self.ctx.version_name,
            self.ctx.prefix_path.display()
        );
        Outcome::Committed(Installed {
            version_name: self.ctx.version_name,
            prefix: self.ctx.prefix_path,
            kept,
        })
    }

    fn fail(self, error: InstallError) -> Outcome {
        self.log.line(format!("error: {error}"));
        tracing::error!("installation of {} failed: {error}", self.ctx.version_name);

        let build_path = if is_empty_dir(&self.ctx.build_path) {
            let _ = fs::remove_dir(&self.ctx.build_path);
            None
        } else if self.ctx.build_path.exists() {
            Some(self.ctx.build_path.clone())
        } else {
            None
        };

        let log_tail = if self.log.is_empty() {
            None
        } else {
            self.log.tail(SUMMARY_TAIL_LINES).ok()
        };

        Outcome::Failed(Failure {
            error,
            build_path,
            log_path: self.ctx.log_path,
            log_tail,
        })
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}

fn remove_quietly(path: &Path, dir: bool) {
    let result = if dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    if let Err(e) = result {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!("failed to remove {}: {e}", path.display());
        }
    }
}

/// Clear group and world write bits on every directory under `prefix`.
///
/// # Errors
///
/// Returns an error if a directory's permissions cannot be changed.
#[cfg(unix)]
pub fn harden_permissions(prefix: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if !prefix.exists() {
        return Ok(());
    }
    for entry in walkdir::WalkDir::new(prefix) {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let mut perms = entry.metadata().map_err(io::Error::other)?.permissions();
        let mode = perms.mode();
        if mode & 0o022 != 0 {
            perms.set_mode(mode & !0o022);
            fs::set_permissions(entry.path(), perms)?;
        }
    }
    Ok(())
}

/// No-op where permission bits do not apply.
///
/// # Errors
///
/// Never fails.
#[cfg(not(unix))]
pub fn harden_permissions(_prefix: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::ConfigFile;
    use std::collections::BTreeMap;

    fn context(root: &Path, keep: bool) -> InstallContext {
        let mut vars = BTreeMap::new();
        vars.insert("KILN_BUILD_PATH".to_string(), root.join("tmp").display().to_string());
        if keep {
            vars.insert("KILN_KEEP".to_string(), "1".to_string());
        }
        let settings = Settings::from_parts(vars, ConfigFile::default());
        InstallContext::new(&settings, "foo-1.0", root.join("prefix"))
    }

    fn failure() -> InstallError {
        InstallError::Io(io::Error::other("step exploded"))
    }

    #[test]
    fn test_initialize_creates_workspace_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), false);
        let tx = Transaction::initialize(ctx.clone(), None).unwrap();

        assert!(ctx.build_path.is_dir());
        assert!(ctx.log_path.is_file());
        assert!(ctx.build_path.starts_with(dir.path().join("tmp")));
        assert!(!tx.cache().is_enabled());

        let err = Transaction::initialize(ctx, None).unwrap_err();
        assert!(matches!(err, InstallError::Workspace { .. }));
    }

    #[test]
    fn test_cache_root_normalized_once() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        fs::create_dir(&cache).unwrap();
        let raw = PathBuf::from(format!("{}/", cache.display()));

        let tx = Transaction::initialize(context(dir.path(), false), Some(&raw)).unwrap();
        assert_eq!(tx.cache().root(), Some(cache.as_path()));
    }

    #[test]
    fn test_commit_removes_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), false);
        let tx = Transaction::initialize(ctx.clone(), None).unwrap();

        let outcome = tx.run(|tx| {
            fs::write(tx.context().build_path.join("junk"), b"x")?;
            fs::create_dir_all(&tx.context().prefix_path)?;
            Ok(())
        });

        assert!(outcome.is_committed());
        assert_eq!(outcome.exit_code(), 0);
        assert!(!ctx.build_path.exists());
        assert!(!ctx.log_path.exists());
    }

    #[test]
    fn test_commit_keeps_workspace_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), true);
        let tx = Transaction::initialize(ctx.clone(), None).unwrap();

        match tx.run(|_| Ok(())) {
            Outcome::Committed(installed) => {
                assert_eq!(installed.kept, Some((ctx.build_path.clone(), ctx.log_path.clone())));
            }
            Outcome::Failed(f) => panic!("unexpected failure: {}", f.summary()),
        }
        assert!(ctx.build_path.is_dir());
        assert!(ctx.log_path.is_file());
    }

    #[test]
    fn test_failure_preserves_non_empty_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), false);
        let tx = Transaction::initialize(ctx.clone(), None).unwrap();

        let outcome = tx.run(|tx| {
            fs::create_dir(tx.context().build_path.join("foo-1.0"))?;
            tx.log().line("configure: error: no acceptable C compiler");
            Err(failure())
        });

        let Outcome::Failed(failed) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failed.build_path, Some(ctx.build_path.clone()));
        assert!(ctx.build_path.join("foo-1.0").is_dir());
        assert!(ctx.log_path.is_file());

        let summary = failed.summary();
        assert!(summary.contains("step exploded"));
        assert!(summary.contains(&ctx.build_path.display().to_string()));
        assert!(summary.contains(&ctx.log_path.display().to_string()));
        assert!(summary.contains("no acceptable C compiler"));
    }

    #[test]
    fn test_failure_removes_empty_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), false);
        let tx = Transaction::initialize(ctx.clone(), None).unwrap();

        let outcome = tx.run(|_| Err(failure()));
        let Outcome::Failed(failed) = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failed.build_path, None);
        assert!(!ctx.build_path.exists());
        assert!(ctx.log_path.is_file());
        assert!(!failed.summary().contains("Inspect"));
    }

    #[cfg(unix)]
    #[test]
    fn test_commit_hardens_directory_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), false);
        let tx = Transaction::initialize(ctx.clone(), None).unwrap();

        let outcome = tx.run(|tx| {
            let share = tx.context().prefix_path.join("share/doc");
            fs::create_dir_all(&share)?;
            for d in [tx.context().prefix_path.clone(), share.clone(), share.parent().unwrap().to_path_buf()] {
                fs::set_permissions(&d, fs::Permissions::from_mode(0o777))?;
            }
            fs::write(share.join("README"), b"x")?;
            fs::set_permissions(share.join("README"), fs::Permissions::from_mode(0o666))?;
            Ok(())
        });
        assert!(outcome.is_committed());

        for entry in walkdir::WalkDir::new(&ctx.prefix_path) {
            let entry = entry.unwrap();
            let mode = entry.metadata().unwrap().permissions().mode();
            if entry.file_type().is_dir() {
                assert_eq!(mode & 0o022, 0, "{} is writable by others", entry.path().display());
            } else {
                assert_eq!(mode & 0o777, 0o666, "files are left alone");
            }
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_commit_hardens_recorded_prefixes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), false);
        let tx = Transaction::initialize(ctx.clone(), None).unwrap();
        let opt = dir.path().join("opt/foo");

        let outcome = tx.run(|tx| {
            fs::create_dir_all(opt.join("lib"))?;
            fs::set_permissions(opt.join("lib"), fs::Permissions::from_mode(0o777))?;
            tx.record_prefix(&opt);
            tx.record_prefix(&opt);
            let run_prefix = tx.context().prefix_path.clone();
            tx.record_prefix(run_prefix);
            assert_eq!(tx.prefixes().count(), 2);
            Ok(())
        });
        assert!(outcome.is_committed());

        let mode = fs::metadata(opt.join("lib")).unwrap().permissions().mode();
        assert_eq!(mode & 0o022, 0);
    }

    #[test]
    fn test_retarget() {
        let dir = tempfile::tempdir().unwrap();
        let mut tx = Transaction::initialize(context(dir.path(), false), None).unwrap();
        tx.retarget("foo-custom", dir.path().join("other"));
        assert_eq!(tx.context().version_name, "foo-custom");
        assert_eq!(tx.context().prefix_path, dir.path().join("other"));
    }
}
