//! Version-control checkouts. No cache applies here.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use super::{FetchError, SourceTree};
use crate::io::BuildLog;

/// Locations of the VCS clients. `None` means not installed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VcsTools {
    /// `git` executable.
    pub git: Option<PathBuf>,
    /// `svn` executable.
    pub svn: Option<PathBuf>,
}

impl VcsTools {
    /// Look both clients up on `PATH`.
    pub fn detect() -> Self {
        Self {
            git: which::which("git").ok(),
            svn: which::which("svn").ok(),
        }
    }
}

/// Shallow clone of `reference` into `target`.
///
/// `clone --branch` only accepts branch and tag names, so when it fails the
/// reference is fetched by id into a fresh repository instead.
pub(super) fn git(
    tool: Option<&Path>,
    url: &str,
    reference: &str,
    target: &Path,
    log: &BuildLog,
) -> Result<SourceTree, FetchError> {
    let tool = tool.ok_or_else(|| FetchError::VcsToolMissing("git".to_string()))?;
    let args: [&OsStr; 7] = [
        "clone".as_ref(),
        "--depth".as_ref(),
        "1".as_ref(),
        "--branch".as_ref(),
        reference.as_ref(),
        url.as_ref(),
        target.as_os_str(),
    ];
    match checkout(tool, &args, url, reference, target, log) {
        Err(FetchError::VcsCheckoutFailed { .. }) => {}
        result => return result,
    }

    log.line(format!("clone of {reference} failed; fetching it as a commit"));
    clear(target)?;
    let dir = target.as_os_str();
    let steps: [Vec<&OsStr>; 4] = [
        vec!["init".as_ref(), "-q".as_ref(), dir],
        vec!["-C".as_ref(), dir, "remote".as_ref(), "add".as_ref(), "origin".as_ref(), url.as_ref()],
        vec![
            "-C".as_ref(),
            dir,
            "fetch".as_ref(),
            "--depth".as_ref(),
            "1".as_ref(),
            "origin".as_ref(),
            reference.as_ref(),
        ],
        vec!["-C".as_ref(), dir, "checkout".as_ref(), "-q".as_ref(), "FETCH_HEAD".as_ref()],
    ];
    for step in &steps {
        run_step(tool, step, url, reference, log)?;
    }

    Ok(SourceTree {
        root: target.to_path_buf(),
    })
}

/// Checkout of `revision` into `target`.
pub(super) fn svn(
    tool: Option<&Path>,
    url: &str,
    revision: &str,
    target: &Path,
    log: &BuildLog,
) -> Result<SourceTree, FetchError> {
    let tool = tool.ok_or_else(|| FetchError::VcsToolMissing("svn".to_string()))?;
    let args: [&OsStr; 6] = [
        "co".as_ref(),
        "-q".as_ref(),
        "-r".as_ref(),
        revision.as_ref(),
        url.as_ref(),
        target.as_os_str(),
    ];
    checkout(tool, &args, url, revision, target, log)
}

fn checkout(
    tool: &Path,
    args: &[&OsStr],
    url: &str,
    reference: &str,
    target: &Path,
    log: &BuildLog,
) -> Result<SourceTree, FetchError> {
    // A previous run may have left a partial checkout behind.
    clear(target)?;

    log.line(format!("-> {url} ({reference})"));
    run_step(tool, args, url, reference, log)?;

    Ok(SourceTree {
        root: target.to_path_buf(),
    })
}

fn clear(target: &Path) -> Result<(), FetchError> {
    if target.exists() {
        fs::remove_dir_all(target)?;
    }
    Ok(())
}

fn run_step(
    tool: &Path,
    args: &[&OsStr],
    url: &str,
    reference: &str,
    log: &BuildLog,
) -> Result<(), FetchError> {
    let status = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(log.stdio()?)
        .stderr(log.stdio()?)
        .status()?;

    if !status.success() {
        return Err(FetchError::VcsCheckoutFailed {
            url: url.to_string(),
            reference: reference.to_string(),
            status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(dir: &Path) -> BuildLog {
        BuildLog::create(&dir.join("build.log")).unwrap()
    }

    #[test]
    fn test_missing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        let target = dir.path().join("foo");

        let err = git(None, "https://example.org/foo.git", "v1", &target, &log).unwrap_err();
        assert!(matches!(err, FetchError::VcsToolMissing(ref t) if t == "git"));
        let err = svn(None, "https://example.org/foo", "42", &target, &log).unwrap_err();
        assert!(matches!(err, FetchError::VcsToolMissing(ref t) if t == "svn"));
    }

    #[test]
    fn test_checkout_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        let target = dir.path().join("foo");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("stale"), b"x").unwrap();

        let err = git(
            Some(Path::new("/bin/false")),
            "https://example.org/foo.git",
            "v1",
            &target,
            &log,
        )
        .unwrap_err();
        assert!(matches!(err, FetchError::VcsCheckoutFailed { .. }));
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_git_commit_reference_fetched_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        let target = dir.path().join("foo");
        let calls = dir.path().join("calls");
        let fake_git = dir.path().join("git");
        crate::builder::tests::script(
            &fake_git,
            &format!(
                "printf '%s\\n' \"$*\" >> '{}'\ncase \"$1\" in clone) exit 128;; init) mkdir -p \"$3\";; esac",
                calls.display()
            ),
        );
        let sha = "0123456789abcdef0123456789abcdef01234567";

        let tree = git(Some(&fake_git), "https://example.org/foo.git", sha, &target, &log).unwrap();

        assert_eq!(tree.root, target);
        let t = target.display();
        let expected = format!(
            "clone --depth 1 --branch {sha} https://example.org/foo.git {t}\n\
             init -q {t}\n\
             -C {t} remote add origin https://example.org/foo.git\n\
             -C {t} fetch --depth 1 origin {sha}\n\
             -C {t} checkout -q FETCH_HEAD\n"
        );
        assert_eq!(fs::read_to_string(&calls).unwrap(), expected);
        assert!(fs::read_to_string(log.path()).unwrap().contains("fetching it as a commit"));
    }

    #[test]
    fn test_checkout_success() {
        let dir = tempfile::tempdir().unwrap();
        let log = log(dir.path());
        let target = dir.path().join("foo");

        let tree = svn(
            Some(Path::new("/bin/true")),
            "https://example.org/foo",
            "42",
            &target,
            &log,
        )
        .unwrap();
        assert_eq!(tree.root, target);
        let content = fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("-> https://example.org/foo (42)"));
    }
}
