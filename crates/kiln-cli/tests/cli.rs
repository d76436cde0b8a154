//! Command-line integration tests for the kiln binary.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

/// Isolated environment: its own HOME, temp root and definitions directory,
/// with a local `foo-1.0` source tree and a fake `make`.
struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let ctx = Self { temp_dir };

        fs::create_dir_all(ctx.path("tmp")).expect("failed to create temp root");
        fs::create_dir_all(ctx.path("definitions")).expect("failed to create definitions dir");

        let src = ctx.path("src/foo-1.0");
        fs::create_dir_all(&src).expect("failed to create source dir");
        script(&src.join("configure"), "echo \"configured $*\"");
        fs::write(src.join("foo.sh"), "#!/bin/sh\necho foo\n").expect("failed to write source");

        script(
            &ctx.path("fake-make"),
            r#"case " $* " in *" install "*) mkdir -p "$PREFIX/bin" && cp foo.sh "$PREFIX/bin/foo";; esac"#,
        );

        ctx.write_definition("foo-1.0", &src);
        ctx
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.temp_dir.path().join(rel)
    }

    fn prefix(&self) -> PathBuf {
        self.path("prefix")
    }

    fn write_definition(&self, name: &str, src: &Path) {
        fs::write(
            self.path("definitions").join(format!("{name}.toml")),
            format!(
                "[[package]]\nname = \"foo-1.0\"\nsource = \"copy\"\nurl = \"{}\"\n",
                src.display()
            ),
        )
        .expect("failed to write definition");
    }

    fn kiln_cmd(&self) -> Command {
        let bin_path = env!("CARGO_BIN_EXE_kiln");
        let mut cmd = Command::new(bin_path);
        cmd.env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .env("HOME", self.temp_dir.path())
            .env("KILN_CONFIG", self.path("config.toml"))
            .env("KILN_BUILD_PATH", self.path("tmp"))
            .env("KILN_DEFINITIONS", self.path("definitions"))
            .env("MAKE", self.path("fake-make"))
            .env("NO_COLOR", "1")
            .stdin(Stdio::null());
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.kiln_cmd()
            .args(args)
            .output()
            .expect("failed to run kiln")
    }

    fn install(&self, flags: &[&str]) -> Output {
        let prefix = self.prefix();
        let mut args: Vec<&str> = flags.to_vec();
        args.push("foo-1.0");
        args.push(prefix.to_str().expect("utf-8 temp path"));
        self.run(&args)
    }
}

fn script(path: &Path, body: &str) {
    fs::write(path, format!("#!/bin/sh\n{body}\n")).expect("failed to write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755))
            .expect("failed to chmod script");
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["--help"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Usage:"));
}

#[test]
fn test_version_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("kiln "));
}

#[test]
fn test_missing_arguments_exit_one() {
    let ctx = TestContext::new();
    let output = ctx.run(&["foo-1.0"]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_list_definitions() {
    let ctx = TestContext::new();
    ctx.write_definition("bar-2.0", &ctx.path("src/foo-1.0"));
    fs::write(ctx.path("definitions/README"), "not a definition").unwrap();

    let output = ctx.run(&["--definitions"]);

    assert!(output.status.success());
    assert_eq!(stdout(&output), "bar-2.0\nfoo-1.0\n");
}

#[test]
fn test_unknown_definition() {
    let ctx = TestContext::new();
    let output = ctx.run(&["nope-9.9", ctx.prefix().to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("definition not found: nope-9.9"));
}

#[test]
fn test_install_success() {
    let ctx = TestContext::new();

    let output = ctx.install(&[]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains(&format!(
        "Installed foo-1.0 to {}",
        ctx.prefix().display()
    )));
    assert!(ctx.prefix().join("bin/foo").is_file());
    assert_eq!(fs::read_dir(ctx.path("tmp")).unwrap().count(), 0);
}

#[test]
fn test_keep_and_verbose() {
    let ctx = TestContext::new();

    let output = ctx.install(&["-k", "-v"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(stderr(&output).contains("configured --prefix="));
    let kept: Vec<_> = fs::read_dir(ctx.path("tmp"))
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(kept.len(), 2, "workspace and log kept: {kept:?}");
    assert!(kept.iter().any(|n| n.ends_with(".log")));
}

#[test]
fn test_existing_prefix_declined_without_tty() {
    let ctx = TestContext::new();
    fs::create_dir_all(ctx.prefix()).unwrap();
    fs::write(ctx.prefix().join("existing"), "keep me").unwrap();

    let output = ctx.install(&[]);

    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("already exists"));
    assert_eq!(fs::read_dir(ctx.path("tmp")).unwrap().count(), 0);
    assert!(!ctx.prefix().join("bin").exists());
}

#[test]
fn test_force_installs_over_existing_prefix() {
    let ctx = TestContext::new();
    fs::create_dir_all(ctx.prefix()).unwrap();
    fs::write(ctx.prefix().join("existing"), "keep me").unwrap();

    let output = ctx.install(&["--force"]);

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    assert!(ctx.prefix().join("existing").is_file());
    assert!(ctx.prefix().join("bin/foo").is_file());
}

#[test]
fn test_failed_build_reports_workspace() {
    let ctx = TestContext::new();
    script(&ctx.path("fake-make"), "echo 'make: *** [all] Error 2' >&2\nexit 2");

    let output = ctx.install(&[]);

    assert_eq!(output.status.code(), Some(1));
    let err = stderr(&output);
    assert!(err.contains("Inspect or clean up the build workspace at"), "stderr: {err}");
    assert!(err.contains("Results logged to"), "stderr: {err}");
    assert!(err.contains("Error 2"), "stderr: {err}");
}
