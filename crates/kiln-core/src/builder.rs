//! Build orchestration.
//!
//! A [`Builder`] runs the strategies named by a package directive, in order,
//! against one [`BuildContext`]. Every external tool is started with the
//! working directory set to the unpacked source tree and its stdout/stderr
//! appended to the build log; nothing reaches the terminal.
//!
//! ## Environment contract
//!
//! On top of the inherited environment, build steps receive:
//!
//! | Variable | Value |
//! |---|---|
//! | `PREFIX` | Install prefix (or the `<PKG>_PREFIX_PATH` override) |
//! | `PATH` | `<prefix>/bin` prepended |
//! | `CPPFLAGS` | `-I<prefix>/include` prepended |
//! | `LDFLAGS` | `-L<prefix>/lib` prepended |
//! | `PKG_CONFIG_PATH` | `<prefix>/lib/pkgconfig` prepended |
//! | `CFLAGS` | Resolved flags, configure step only |
//!
//! Variables exported by hooks are applied last.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use kiln_schema::PackageSpec;
use thiserror::Error;

use crate::io::BuildLog;
use crate::options::BuildOptions;
use crate::strategies::StrategyRegistry;

/// Lines of build log carried in a step failure.
pub const TAIL_LINES: usize = 20;

/// Build failures. Any of them aborts the whole run.
#[derive(Error, Debug)]
pub enum BuildError {
    /// A build tool could not be started.
    #[error("{tool} not found")]
    ToolMissing {
        /// Program that was not found.
        tool: String,
    },

    /// A build step exited unsuccessfully.
    #[error("{package}: {step} failed ({status})")]
    StepFailed {
        /// Package being built.
        package: String,
        /// Step that failed, e.g. `configure`.
        step: String,
        /// Exit status of the step.
        status: ExitStatus,
        /// Last lines of the build log.
        tail: String,
    },

    /// A directive names a strategy nobody registered.
    #[error("unknown build strategy '{name}'")]
    UnknownStrategy {
        /// Strategy name from the definition.
        name: String,
    },

    /// Filesystem errors while preparing or post-processing the prefix.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Everything a strategy can see and change while building one package.
#[derive(Debug)]
pub struct BuildContext<'a> {
    /// The directive being built.
    pub package: &'a PackageSpec,
    /// Root of the unpacked sources; the working directory of every step.
    pub source: &'a Path,
    /// Install prefix of the run.
    pub prefix: &'a Path,
    /// Options for this package. Strategies may amend them for later steps.
    pub options: BuildOptions,
    /// Make program.
    pub make: &'a str,
    /// Extra environment exported by hooks.
    pub env: &'a BTreeMap<String, String>,
    /// Build log receiving tool output.
    pub log: &'a BuildLog,
}

impl BuildContext<'_> {
    /// Where this package installs: the per-package override, else the run
    /// prefix.
    pub fn install_prefix(&self) -> &Path {
        self.options.prefix.as_deref().unwrap_or(self.prefix)
    }

    /// `LDFLAGS` as passed to build steps.
    pub fn ldflags(&self) -> String {
        prepend_flag(
            format!("-L{}", self.prefix.join("lib").display()),
            self.options.ldflags.as_deref(),
            " ",
        )
    }

    /// Environment added to every build step.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let prefix = self.install_prefix().display().to_string();
        let run_prefix = self.prefix;
        let inherited_path = self
            .options
            .path
            .clone()
            .or_else(|| std::env::var("PATH").ok());
        let mut vars = vec![
            ("PREFIX".to_string(), prefix),
            (
                "PATH".to_string(),
                prepend_flag(
                    run_prefix.join("bin").display().to_string(),
                    inherited_path.as_deref(),
                    ":",
                ),
            ),
            (
                "CPPFLAGS".to_string(),
                prepend_flag(
                    format!("-I{}", run_prefix.join("include").display()),
                    self.options.cppflags.as_deref(),
                    " ",
                ),
            ),
            ("LDFLAGS".to_string(), self.ldflags()),
            (
                "PKG_CONFIG_PATH".to_string(),
                prepend_flag(
                    run_prefix.join("lib/pkgconfig").display().to_string(),
                    self.options.pkg_config_path.as_deref(),
                    ":",
                ),
            ),
        ];
        vars.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }

    /// A command for `program` with the build environment applied and the
    /// source tree as working directory.
    pub fn command(&self, program: impl AsRef<OsStr>) -> Command {
        let mut cmd = Command::new(program);
        cmd.current_dir(self.source);
        for (key, value) in self.env_vars() {
            cmd.env(key, value);
        }
        cmd
    }

    /// Run `cmd` as build step `step`, output to the log.
    ///
    /// # Errors
    ///
    /// `ToolMissing` when the program cannot be found, `StepFailed` on a
    /// non-zero exit.
    pub fn run(&self, step: &str, mut cmd: Command) -> Result<(), BuildError> {
        let program = cmd.get_program().to_string_lossy().into_owned();
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        self.log.line(format!("$ {program} {}", args.join(" ")));

        cmd.stdin(Stdio::null())
            .stdout(self.log.stdio()?)
            .stderr(self.log.stdio()?);

        let status = match cmd.status() {
            Ok(status) => status,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.log.line(format!("{program}: command not found"));
                return Err(BuildError::ToolMissing { tool: program });
            }
            Err(e) => return Err(e.into()),
        };

        if !status.success() {
            return Err(BuildError::StepFailed {
                package: self.package.name.to_string(),
                step: step.to_string(),
                status,
                tail: self.log.tail(TAIL_LINES).unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Run the make program with `args`.
    ///
    /// # Errors
    ///
    /// See [`BuildContext::run`].
    pub fn make<S: AsRef<OsStr>>(&self, step: &str, args: &[S]) -> Result<(), BuildError> {
        let mut cmd = self.command(self.make);
        cmd.args(args);
        self.run(step, cmd)
    }

    /// Arguments for the configure step: `--prefix`, configured options, and
    /// every conditional argument that is not vetoed.
    pub fn configure_args(&self) -> Vec<String> {
        let mut args = vec![format!("--prefix={}", self.install_prefix().display())];
        args.extend(self.options.configure_opts.iter().cloned());

        for cond in &self.options.conditional_args {
            if let Some(flag) = &cond.skip_if_flag {
                if args.iter().any(|a| a.starts_with(flag.as_str())) {
                    self.log.line(format!("skipping {}: {flag} already given", cond.arg));
                    continue;
                }
            }
            if let Some(predicate) = &cond.skip_if {
                if shell_predicate(predicate, Some(self.source), self.log) {
                    self.log.line(format!("skipping {}: `{predicate}` succeeded", cond.arg));
                    continue;
                }
            }
            args.push(cond.arg.clone());
        }
        args
    }

    /// Run the configure script.
    ///
    /// # Errors
    ///
    /// See [`BuildContext::run`].
    pub fn configure(&self) -> Result<(), BuildError> {
        let program = self.options.configure.as_deref().unwrap_or("./configure");
        let mut cmd = self.command(resolve_program(self.source, program));
        cmd.args(self.configure_args());
        if let Some(cflags) = &self.options.cflags {
            cmd.env("CFLAGS", cflags);
        }
        self.run("configure", cmd)
    }
}

/// Relative paths with a separator are taken relative to the source tree;
/// bare names are looked up on `PATH`.
fn resolve_program(source: &Path, program: &str) -> PathBuf {
    let path = Path::new(program);
    if path.is_relative() && program.contains('/') {
        source.join(path)
    } else {
        path.to_path_buf()
    }
}

fn prepend_flag(first: String, rest: Option<&str>, sep: &str) -> String {
    match rest {
        Some(rest) if !rest.is_empty() => format!("{first}{sep}{rest}"),
        _ => first,
    }
}

/// Run `script` with `sh -c` and report whether it exited 0. Output goes to
/// the log; a shell that cannot be started counts as failure.
pub fn shell_predicate(script: &str, cwd: Option<&Path>, log: &BuildLog) -> bool {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script).stdin(Stdio::null());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    if let (Ok(out), Ok(err)) = (log.stdio(), log.stdio()) {
        cmd.stdout(out).stderr(err);
    }
    cmd.status().is_ok_and(|s| s.success())
}

/// Runs the strategies of a package directive in order.
#[derive(Debug)]
pub struct Builder<'a> {
    registry: &'a StrategyRegistry,
}

impl<'a> Builder<'a> {
    /// Create a builder dispatching through `registry`.
    pub fn new(registry: &'a StrategyRegistry) -> Self {
        Self { registry }
    }

    /// Build one package. Stops at the first failing strategy.
    ///
    /// # Errors
    ///
    /// Returns the first `BuildError`, or `UnknownStrategy` for a name that
    /// is not registered.
    pub fn build(&self, ctx: &mut BuildContext<'_>) -> Result<(), BuildError> {
        let package = ctx.package;
        for name in &package.build {
            let strategy = self
                .registry
                .get(name)
                .ok_or_else(|| BuildError::UnknownStrategy { name: name.clone() })?;
            ctx.log.line(format!("==> {}: {name}", package.name));
            tracing::debug!("running strategy {name} for {}", package.name);
            strategy.run(ctx)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use kiln_schema::Definition;
    use std::fs;

    pub(crate) fn script(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    pub(crate) struct Fixture {
        pub(crate) dir: tempfile::TempDir,
        pub(crate) spec: PackageSpec,
        pub(crate) log: BuildLog,
        pub(crate) make: String,
        pub(crate) env: BTreeMap<String, String>,
    }

    impl Fixture {
        pub(crate) fn new(extra_toml: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            fs::create_dir_all(dir.path().join("src")).unwrap();
            fs::create_dir_all(dir.path().join("prefix")).unwrap();
            let log = BuildLog::create(&dir.path().join("build.log")).unwrap();

            script(
                &dir.path().join("src/configure"),
                "echo \"$@\" > configure.args\necho \"PREFIX=$PREFIX CFLAGS=$CFLAGS CPPFLAGS=$CPPFLAGS\" > configure.env",
            );
            let make = dir.path().join("fake-make");
            script(
                &make,
                "echo \"make $*\" >> make.calls\n\
                 case \" $* \" in *\" install \"*) mkdir -p \"$PREFIX/bin\" && echo bin > \"$PREFIX/bin/foo\";; esac",
            );

            let spec = Definition::parse(&format!(
                "[[package]]\nname = \"foo-1.0\"\nurl = \"https://example.org/foo-1.0.tar.gz\"\n{extra_toml}"
            ))
            .unwrap()
            .packages
            .remove(0);

            Self {
                make: make.display().to_string(),
                dir,
                spec,
                log,
                env: BTreeMap::new(),
            }
        }

        pub(crate) fn source(&self) -> PathBuf {
            self.dir.path().join("src")
        }

        pub(crate) fn prefix(&self) -> PathBuf {
            self.dir.path().join("prefix")
        }

        pub(crate) fn read(&self, rel: &str) -> String {
            fs::read_to_string(self.dir.path().join(rel)).unwrap()
        }
    }

    pub(crate) fn context<'a>(
        f: &'a Fixture,
        source: &'a Path,
        prefix: &'a Path,
        options: BuildOptions,
    ) -> BuildContext<'a> {
        BuildContext {
            package: &f.spec,
            source,
            prefix,
            options,
            make: &f.make,
            env: &f.env,
            log: &f.log,
        }
    }

    fn options() -> BuildOptions {
        BuildOptions {
            make_opts: vec!["-j2".to_string()],
            ..BuildOptions::default()
        }
    }

    #[test]
    fn test_standard_build() {
        let f = Fixture::new("");
        let (source, prefix) = (f.source(), f.prefix());
        let mut options = options();
        options.configure_opts = vec!["--with-x".to_string()];
        options.cflags = Some("-O2".to_string());
        let mut ctx = context(&f, &source, &prefix, options);

        let registry = StrategyRegistry::builtin();
        Builder::new(&registry).build(&mut ctx).unwrap();

        assert_eq!(
            f.read("src/configure.args").trim(),
            format!("--prefix={} --with-x", prefix.display())
        );
        let env = f.read("src/configure.env");
        assert!(env.contains(&format!("PREFIX={}", prefix.display())));
        assert!(env.contains("CFLAGS=-O2"));
        assert!(env.contains(&format!("CPPFLAGS=-I{}/include", prefix.display())));
        assert_eq!(f.read("src/make.calls"), "make -j2\nmake install\n");
        assert!(prefix.join("bin/foo").is_file());

        let log = f.read("build.log");
        assert!(log.contains("==> foo-1.0: standard"));
    }

    #[test]
    fn test_prefix_override() {
        let f = Fixture::new("");
        let (source, prefix) = (f.source(), f.prefix());
        let mut options = options();
        options.prefix = Some(f.dir.path().join("elsewhere"));
        let ctx = context(&f, &source, &prefix, options);
        assert_eq!(ctx.install_prefix(), f.dir.path().join("elsewhere"));
        assert!(ctx.configure_args()[0].ends_with("/elsewhere"));
    }

    #[test]
    fn test_step_failure_carries_tail() {
        let f = Fixture::new("");
        let (source, prefix) = (f.source(), f.prefix());
        script(&source.join("configure"), "echo 'no compiler found' >&2\nexit 3");
        let mut ctx = context(&f, &source, &prefix, options());

        let registry = StrategyRegistry::builtin();
        let err = Builder::new(&registry).build(&mut ctx).unwrap_err();
        match err {
            BuildError::StepFailed {
                package,
                step,
                status,
                tail,
            } => {
                assert_eq!(package, "foo-1.0");
                assert_eq!(step, "configure");
                assert_eq!(status.code(), Some(3));
                assert!(tail.contains("no compiler found"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!prefix.join("bin").exists());
    }

    #[test]
    fn test_missing_tool() {
        let f = Fixture::new("");
        let (source, prefix) = (f.source(), f.prefix());
        let mut ctx = context(&f, &source, &prefix, options());
        ctx.make = "kiln-no-such-make";

        let err = ctx.make("make", &["all"]).unwrap_err();
        assert!(matches!(err, BuildError::ToolMissing { ref tool } if tool == "kiln-no-such-make"));
    }

    #[test]
    fn test_unknown_strategy() {
        let f = Fixture::new("build = [\"standard\", \"frobnicate\"]\n");
        let (source, prefix) = (f.source(), f.prefix());
        let mut ctx = context(&f, &source, &prefix, options());

        let registry = StrategyRegistry::builtin();
        let err = Builder::new(&registry).build(&mut ctx).unwrap_err();
        assert!(matches!(err, BuildError::UnknownStrategy { ref name } if name == "frobnicate"));
    }

    #[test]
    fn test_conditional_args() {
        let f = Fixture::new(
            "configure_args = [\n\
             { arg = \"--with-ssl\" },\n\
             { arg = \"--with-readline\", skip_if_flag = \"--without-readline\" },\n\
             { arg = \"--with-tk\", skip_if = \"true\" },\n\
             { arg = \"--with-gdbm\", skip_if = \"false\" },\n\
             ]\n",
        );
        let (source, prefix) = (f.source(), f.prefix());
        let mut options = options();
        options.configure_opts = vec!["--without-readline".to_string()];
        let options = options.with_definition_args(&f.spec.configure_args);
        let ctx = context(&f, &source, &prefix, options);

        let args = ctx.configure_args();
        assert_eq!(
            &args[1..],
            ["--without-readline", "--with-ssl", "--with-gdbm"]
        );
    }

    #[test]
    fn test_hook_env_applied_last() {
        let mut f = Fixture::new("");
        f.env.insert("PREFIX".to_string(), "/hooked".to_string());
        f.env.insert("EXTRA".to_string(), "1".to_string());
        let (source, prefix) = (f.source(), f.prefix());
        let ctx = context(&f, &source, &prefix, options());

        let vars = ctx.env_vars();
        let last_prefix = vars.iter().rev().find(|(k, _)| k == "PREFIX").unwrap();
        assert_eq!(last_prefix.1, "/hooked");
        assert!(vars.iter().any(|(k, v)| k == "EXTRA" && v == "1"));
    }

    #[test]
    fn test_shell_predicate() {
        let dir = tempfile::tempdir().unwrap();
        let log = BuildLog::create(&dir.path().join("build.log")).unwrap();
        assert!(shell_predicate("exit 0", None, &log));
        assert!(!shell_predicate("exit 1", Some(dir.path()), &log));
    }

    #[test]
    fn test_resolve_program() {
        let src = Path::new("/src/foo");
        assert_eq!(resolve_program(src, "./configure"), PathBuf::from("/src/foo/./configure"));
        assert_eq!(resolve_program(src, "cmake"), PathBuf::from("cmake"));
        assert_eq!(resolve_program(src, "/opt/conf"), PathBuf::from("/opt/conf"));
    }
}
