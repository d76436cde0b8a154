//! Named build strategies.
//!
//! A definition refers to strategies by name; [`StrategyRegistry`] maps each
//! name to an implementation. Every strategy must be safe to run again over
//! an already extracted tree and an already populated prefix.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use kiln_schema::PackageSpec;

use crate::builder::{BuildContext, BuildError};

/// A build procedure selectable by name.
pub trait Strategy: Send + Sync + fmt::Debug {
    /// Name used in definitions.
    fn name(&self) -> &'static str;

    /// Run against `ctx`. Changes to `ctx.options` are visible to the
    /// strategies that follow for the same package.
    ///
    /// # Errors
    ///
    /// Returns a `BuildError` when a step fails.
    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError>;
}

/// Strategy name to implementation.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<&'static str, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    /// Registry with no strategies.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in strategy.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Standard);
        registry.register(Autoconf);
        registry.register(CopyInstall);
        registry.register(EnableShared);
        registry.register(LdflagsDirs);
        registry.register(LinkAliases);
        registry.register(StripWindows);
        registry
    }

    /// Add or replace a strategy.
    pub fn register(&mut self, strategy: impl Strategy + 'static) {
        self.strategies.insert(strategy.name(), Arc::new(strategy));
    }

    /// Look a strategy up by name.
    pub fn get(&self, name: &str) -> Option<&dyn Strategy> {
        self.strategies.get(name).map(AsRef::as_ref)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.keys().copied().collect()
    }

    /// Check that every strategy `spec` names is registered.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::UnknownStrategy` for the first unknown name.
    pub fn validate(&self, spec: &PackageSpec) -> Result<(), BuildError> {
        match spec.build.iter().find(|name| self.get(name).is_none()) {
            Some(name) => Err(BuildError::UnknownStrategy { name: name.clone() }),
            None => Ok(()),
        }
    }
}

/// `configure`, `make`, `make install`.
#[derive(Debug, Clone, Copy)]
pub struct Standard;

impl Strategy for Standard {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        ctx.configure()?;
        ctx.make("make", &ctx.options.make_opts)?;

        let mut install = ctx.options.make_install_opts.clone();
        install.push("install".to_string());
        ctx.make("make install", &install)
    }
}

/// Regenerate the configure script with `autoreconf -i`.
#[derive(Debug, Clone, Copy)]
pub struct Autoconf;

impl Strategy for Autoconf {
    fn name(&self) -> &'static str {
        "autoconf"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        let mut cmd = ctx.command("autoreconf");
        cmd.arg("-i");
        ctx.run("autoreconf", cmd)
    }
}

/// Copy the source tree into the prefix as is.
#[derive(Debug, Clone, Copy)]
pub struct CopyInstall;

impl Strategy for CopyInstall {
    fn name(&self) -> &'static str {
        "copy"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        let dest = ctx.install_prefix().to_path_buf();
        fs::create_dir_all(&dest)?;
        ctx.log.line(format!("copying {} to {}", ctx.source.display(), dest.display()));
        fs_extra::dir::copy(
            ctx.source,
            &dest,
            &fs_extra::dir::CopyOptions::new()
                .content_only(true)
                .overwrite(true),
        )
        .map_err(|e| std::io::Error::other(format!("copy failed: {e}")))?;
        Ok(())
    }
}

/// Add `--enable-shared` to later configure steps.
#[derive(Debug, Clone, Copy)]
pub struct EnableShared;

impl Strategy for EnableShared {
    fn name(&self) -> &'static str {
        "enable_shared"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        const FLAG: &str = "--enable-shared";
        if !ctx.options.configure_opts.iter().any(|o| o == FLAG) {
            ctx.options.configure_opts.push(FLAG.to_string());
        }
        Ok(())
    }
}

/// Create every `-L` directory named in `LDFLAGS`, so linkers that reject
/// missing search paths do not fail.
#[derive(Debug, Clone, Copy)]
pub struct LdflagsDirs;

impl Strategy for LdflagsDirs {
    fn name(&self) -> &'static str {
        "ldflags_dirs"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        for dir in ctx.ldflags().split_whitespace().filter_map(|f| f.strip_prefix("-L")) {
            if !dir.is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }
}

/// Symlink each `alias -> target` from the directive into `<prefix>/bin`.
#[derive(Debug, Clone, Copy)]
pub struct LinkAliases;

impl Strategy for LinkAliases {
    fn name(&self) -> &'static str {
        "link_aliases"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        if ctx.package.aliases.is_empty() {
            return Ok(());
        }
        let bin = ctx.install_prefix().join("bin");
        fs::create_dir_all(&bin)?;

        for (alias, target) in &ctx.package.aliases {
            let link = bin.join(alias);
            if link.symlink_metadata().is_ok() {
                fs::remove_file(&link)?;
            }
            symlink(Path::new(target), &link)?;
            ctx.log.line(format!("linked {} -> {target}", link.display()));
        }
        Ok(())
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    let source = link.parent().map_or_else(|| target.to_path_buf(), |p| p.join(target));
    fs::copy(source, link).map(|_| ())
}

/// Remove `*.bat`, `*.exe` and `*.dll` from `<prefix>/bin`.
#[derive(Debug, Clone, Copy)]
pub struct StripWindows;

impl Strategy for StripWindows {
    fn name(&self) -> &'static str {
        "strip_windows"
    }

    fn run(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        let bin = ctx.install_prefix().join("bin");
        let Ok(entries) = fs::read_dir(&bin) else {
            return Ok(());
        };

        for entry in entries {
            let path = entry?.path();
            let windows_only = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| ["bat", "exe", "dll"].contains(&e.to_ascii_lowercase().as_str()));
            if windows_only && !path.is_dir() {
                fs::remove_file(&path)?;
                ctx.log.line(format!("removed {}", path.display()));
            }
        }
        Ok(())
    }
}
