//! Before/after install hooks.
//!
//! Hooks are callbacks registered per [`Phase`] and run in registration
//! order. Each receives the mutable [`HookContext`], so a hook can rename the
//! version, move the prefix or export variables into the build environment,
//! and every later hook and build step observes the change.
//!
//! External plugins are shell scripts. Discovery returns their paths, and
//! each script is registered as a [`ScriptHook`] for both phases; it is
//! invoked as `sh <script> <phase>` and talks back through stdout:
//!
//! ```text
//! VERSION_NAME=3.12.1-custom
//! PREFIX=/opt/versions/3.12.1-custom
//! export CFLAGS=-O3
//! ```
//!
//! Any other stdout line is copied to the build log.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;

use thiserror::Error;

use crate::io::BuildLog;

/// Hook failures. A failing hook aborts the run like a failing build step.
#[derive(Error, Debug)]
pub enum HookError {
    /// A registered callback returned an error.
    #[error("hook {name} failed: {reason}")]
    Failed {
        /// Hook name.
        name: String,
        /// What went wrong.
        reason: String,
    },

    /// A hook script exited unsuccessfully.
    #[error("hook script {} failed ({status})", .script.display())]
    ScriptFailed {
        /// Script path.
        script: PathBuf,
        /// Exit status.
        status: ExitStatus,
    },

    /// The discovery command failed.
    #[error("hook discovery `{command}` failed: {reason}")]
    DiscoveryFailed {
        /// Discovery command line.
        command: String,
        /// What went wrong.
        reason: String,
    },

    /// Reading hook directories or running a script failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// When a hook runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Before anything is fetched.
    Before,
    /// After the run has committed or failed.
    After,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Before => "before",
            Self::After => "after",
        })
    }
}

/// State shared with hooks, threaded through the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookContext {
    /// Name the installed version is known by.
    pub version_name: String,
    /// Install prefix.
    pub prefix: PathBuf,
    /// Definition file, when the definition came from disk.
    pub definition: Option<PathBuf>,
    /// Exit status of the run; set for the after phase only.
    pub status: Option<i32>,
    /// Variables exported into every build step.
    pub env: BTreeMap<String, String>,
}

impl HookContext {
    /// Context for installing `version_name` into `prefix`.
    pub fn new(version_name: impl Into<String>, prefix: impl Into<PathBuf>) -> Self {
        Self {
            version_name: version_name.into(),
            prefix: prefix.into(),
            definition: None,
            status: None,
            env: BTreeMap::new(),
        }
    }
}

/// A registered hook callback.
pub type HookFn = Arc<dyn Fn(&mut HookContext, &BuildLog) -> Result<(), HookError> + Send + Sync>;

struct Registered {
    name: String,
    hook: HookFn,
}

/// Ordered before/after hook lists. Append-only.
#[derive(Default, Clone)]
pub struct HookRegistry {
    before: Vec<Arc<Registered>>,
    after: Vec<Arc<Registered>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |list: &[Arc<Registered>]| list.iter().map(|r| r.name.clone()).collect::<Vec<_>>();
        f.debug_struct("HookRegistry")
            .field("before", &names(&self.before[..]))
            .field("after", &names(&self.after[..]))
            .finish()
    }
}

impl HookRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback to `phase`.
    pub fn register<F>(&mut self, phase: Phase, name: impl Into<String>, hook: F)
    where
        F: Fn(&mut HookContext, &BuildLog) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.push(phase, name.into(), Arc::new(hook));
    }

    fn push(&mut self, phase: Phase, name: String, hook: HookFn) {
        let entry = Arc::new(Registered { name, hook });
        match phase {
            Phase::Before => self.before.push(entry),
            Phase::After => self.after.push(entry),
        }
    }

    /// Register a script for both phases.
    pub fn register_script(&mut self, script: ScriptHook) {
        let script = Arc::new(script);
        let name = script.path.display().to_string();
        for phase in [Phase::Before, Phase::After] {
            let script = Arc::clone(&script);
            self.push(
                phase,
                name.clone(),
                Arc::new(move |ctx: &mut HookContext, log: &BuildLog| script.run(phase, ctx, log)),
            );
        }
    }

    /// Discover scripts through each source in turn and register them.
    /// Returns how many were registered.
    ///
    /// # Errors
    ///
    /// Returns the first discovery error.
    pub fn load(&mut self, sources: &[&dyn HookDiscovery]) -> Result<usize, HookError> {
        let mut count = 0;
        for source in sources {
            for path in source.discover()? {
                tracing::debug!("loading hook {}", path.display());
                self.register_script(ScriptHook::new(path));
                count += 1;
            }
        }
        Ok(count)
    }

    /// Number of callbacks for `phase`.
    pub fn len(&self, phase: Phase) -> usize {
        self.list(phase).len()
    }

    /// Whether no callbacks are registered at all.
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    fn list(&self, phase: Phase) -> &[Arc<Registered>] {
        match phase {
            Phase::Before => &self.before,
            Phase::After => &self.after,
        }
    }

    /// Run every callback of `phase` in registration order, stopping at the
    /// first failure.
    ///
    /// # Errors
    ///
    /// Returns the error of the failing hook.
    pub fn run_all(&self, phase: Phase, ctx: &mut HookContext, log: &BuildLog) -> Result<(), HookError> {
        for entry in self.list(phase) {
            log.line(format!("==> {phase} hook {}", entry.name));
            (entry.hook)(ctx, log)?;
        }
        Ok(())
    }
}

/// A source of hook script paths.
pub trait HookDiscovery: fmt::Debug {
    /// Script paths, in the order they should be registered.
    ///
    /// # Errors
    ///
    /// Returns a `HookError` if enumeration fails.
    fn discover(&self) -> Result<Vec<PathBuf>, HookError>;
}

/// Scripts under `<dir>/install/` for each directory, sorted by name.
/// Missing directories are skipped.
#[derive(Debug, Clone, Default)]
pub struct DirectoryDiscovery {
    dirs: Vec<PathBuf>,
}

impl DirectoryDiscovery {
    /// Discover scripts in `dirs`.
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }
}

impl HookDiscovery for DirectoryDiscovery {
    fn discover(&self) -> Result<Vec<PathBuf>, HookError> {
        let mut scripts = Vec::new();
        for dir in &self.dirs {
            let install = dir.join("install");
            let Ok(entries) = fs::read_dir(&install) else {
                continue;
            };
            let mut found: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            found.sort();
            scripts.extend(found);
        }
        Ok(scripts)
    }
}

/// Runs a command and reads one script path per stdout line.
#[derive(Debug, Clone)]
pub struct CommandDiscovery {
    command: String,
}

impl CommandDiscovery {
    /// Discover scripts by running `command` with `sh -c`.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl HookDiscovery for CommandDiscovery {
    fn discover(&self) -> Result<Vec<PathBuf>, HookError> {
        let failed = |reason: String| HookError::DiscoveryFailed {
            command: self.command.clone(),
            reason,
        };
        let output = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| failed(e.to_string()))?;
        if !output.status.success() {
            return Err(failed(format!("exited with {}", output.status)));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect())
    }
}

/// A plugin script registered as a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHook {
    path: PathBuf,
}

impl ScriptHook {
    /// Hook running the script at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Script location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the script for `phase` and apply what it prints to `ctx`.
    ///
    /// # Errors
    ///
    /// Returns `HookError::ScriptFailed` on a non-zero exit.
    pub fn run(&self, phase: Phase, ctx: &mut HookContext, log: &BuildLog) -> Result<(), HookError> {
        let mut cmd = Command::new("sh");
        cmd.arg(&self.path)
            .arg(phase.to_string())
            .envs(&ctx.env)
            .env("KILN_PREFIX", &ctx.prefix)
            .env("KILN_VERSION_NAME", &ctx.version_name)
            .stdin(Stdio::null())
            .stderr(log.stdio()?);
        if let Some(definition) = &ctx.definition {
            cmd.env("KILN_DEFINITION", definition);
        }
        if let (Phase::After, Some(status)) = (phase, ctx.status) {
            cmd.env("KILN_STATUS", status.to_string());
        }

        let output = cmd.output()?;
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            apply_line(line, ctx, log);
        }

        if output.status.success() {
            Ok(())
        } else {
            Err(HookError::ScriptFailed {
                script: self.path.clone(),
                status: output.status,
            })
        }
    }
}

fn apply_line(line: &str, ctx: &mut HookContext, log: &BuildLog) {
    if let Some(name) = line.strip_prefix("VERSION_NAME=") {
        ctx.version_name = unquote(name).to_string();
    } else if let Some(prefix) = line.strip_prefix("PREFIX=") {
        ctx.prefix = PathBuf::from(unquote(prefix));
    } else if let Some((key, value)) = line
        .strip_prefix("export ")
        .and_then(|rest| rest.trim().split_once('='))
    {
        ctx.env.insert(key.to_string(), unquote(value).to_string());
    } else {
        log.line(line);
    }
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
}
