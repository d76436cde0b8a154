//! Local source trees, copied into the workspace as if fetched.

use std::fs;
use std::path::Path;

use super::{FetchError, SourceTree};
use crate::io::BuildLog;

pub(super) fn fetch(source: &Path, target: &Path, log: &BuildLog) -> Result<SourceTree, FetchError> {
    if !source.is_dir() {
        return Err(FetchError::SourceMissing(source.to_path_buf()));
    }
    if target.exists() {
        fs::remove_dir_all(target)?;
    }
    fs::create_dir_all(target)?;

    log.line(format!("-> {}", source.display()));
    fs_extra::dir::copy(
        source,
        target,
        &fs_extra::dir::CopyOptions::new()
            .content_only(true)
            .overwrite(true),
    )
    .map_err(|e| std::io::Error::other(format!("copy failed: {e}")))?;

    Ok(SourceTree {
        root: target.to_path_buf(),
    })
}
