//! Filesystem locations
//!
//! Config file, definitions directory and temp root, plus the per-run
//! workspace and log paths derived from the temp root.

use std::path::{Path, PathBuf};

/// Configuration file: `$KILN_CONFIG`, else `<config_dir>/kiln/config.toml`.
pub fn config_file(vars: &std::collections::BTreeMap<String, String>) -> Option<PathBuf> {
    if let Some(val) = vars.get("KILN_CONFIG").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(val));
    }
    dirs::config_dir().map(|d| d.join("kiln").join("config.toml"))
}

/// Built-in definitions directory.
///
/// Looks next to the executable first (`<bin>/../share/kiln/definitions`,
/// the layout of an installed release), then in the user data directory.
pub fn default_definitions_dir() -> Option<PathBuf> {
    let installed = std::env::current_exe().ok().and_then(|exe| {
        let share = exe.parent()?.parent()?.join("share/kiln/definitions");
        share.is_dir().then_some(share)
    });
    installed.or_else(|| dirs::data_dir().map(|d| d.join("kiln").join("definitions")))
}

/// Temp root for build workspaces: `$TMPDIR`, else the system temp dir.
pub fn default_build_root(vars: &std::collections::BTreeMap<String, String>) -> PathBuf {
    vars.get("TMPDIR")
        .filter(|v| !v.is_empty())
        .map_or_else(std::env::temp_dir, PathBuf::from)
}

/// Unique run identifier: UTC timestamp plus process id.
///
/// Two concurrent invocations never share a workspace because their pids
/// differ; one process running twice in the same second gets the same id,
/// which [`crate::Transaction::initialize`] rejects.
pub fn run_id() -> String {
    let timestamp = chrono::Utc::now().format("%Y%m%d%H%M%S");
    format!("{timestamp}.{}", std::process::id())
}

/// Build workspace path for a run: `<root>/kiln.<run_id>`.
pub fn build_path(root: &Path, run_id: &str) -> PathBuf {
    root.join(format!("{}.{run_id}", crate::WORKSPACE_PREFIX))
}

/// Build log path for a run: `<root>/kiln.<run_id>.log`.
pub fn log_path(root: &Path, run_id: &str) -> PathBuf {
    root.join(format!("{}.{run_id}.log", crate::WORKSPACE_PREFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_paths_share_run_id() {
        let root = Path::new("/tmp");
        let id = "20240101120000.42";
        assert_eq!(build_path(root, id), PathBuf::from("/tmp/kiln.20240101120000.42"));
        assert_eq!(log_path(root, id), PathBuf::from("/tmp/kiln.20240101120000.42.log"));
    }

    #[test]
    fn test_run_id_contains_pid() {
        let id = run_id();
        assert!(id.ends_with(&format!(".{}", std::process::id())));
    }

    #[test]
    fn test_build_root_prefers_tmpdir() {
        let mut vars = BTreeMap::new();
        vars.insert("TMPDIR".to_string(), "/var/tmp/kiln".to_string());
        assert_eq!(default_build_root(&vars), PathBuf::from("/var/tmp/kiln"));
    }

    #[test]
    fn test_config_file_override() {
        let mut vars = BTreeMap::new();
        vars.insert("KILN_CONFIG".to_string(), "/etc/kiln.toml".to_string());
        assert_eq!(config_file(&vars), Some(PathBuf::from("/etc/kiln.toml")));
    }
}
