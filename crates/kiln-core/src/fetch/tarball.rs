//! Tarball fetch: cache, then mirror, then primary URL; verify, cache,
//! extract.

use std::fs;
use std::path::{Path, PathBuf};

use kiln_schema::source::filename_from_url;
use kiln_schema::{Checksum, PackageName};

use super::transport::HttpClient;
use super::{FetchError, SourceTree};
use crate::cache::{self, CacheStore};
use crate::checksum::ChecksumVerifier;
use crate::io::BuildLog;
use crate::io::extract::{self, ExtractError};

pub(super) struct Request<'a> {
    pub(super) name: &'a PackageName,
    pub(super) url: &'a str,
    pub(super) mirror: Option<&'a str>,
    pub(super) checksum: Option<&'a Checksum>,
    pub(super) dest: &'a Path,
}

pub(super) fn fetch(
    req: &Request<'_>,
    http: Option<&dyn HttpClient>,
    verifier: &ChecksumVerifier,
    cache: &CacheStore,
    log: &BuildLog,
) -> Result<SourceTree, FetchError> {
    let filename = filename_from_url(req.url);
    let archive = req.dest.join(filename);
    remove_stale(&archive)?;

    if let Some(cached) = cache.lookup(filename, req.checksum, verifier, log) {
        cache::link(&cached, &archive)?;
    } else {
        let http = http.ok_or(FetchError::NetworkUnavailable)?;
        download(req, http, verifier, &archive, log)?;
        cache.store(filename, &archive, log)?;
    }

    let files = extract::extract_auto(&archive, req.dest)?;
    fs::remove_file(&archive)?;

    let root = source_root(req.name, req.dest, &files)?;
    Ok(SourceTree { root })
}

fn download(
    req: &Request<'_>,
    http: &dyn HttpClient,
    verifier: &ChecksumVerifier,
    archive: &Path,
    log: &BuildLog,
) -> Result<(), FetchError> {
    if let Some(mirror) = req.mirror {
        match try_mirror(mirror, req.checksum, http, verifier, archive, log) {
            Ok(()) => return Ok(()),
            Err(reason) => {
                log.line(format!("mirror {mirror} unusable ({reason}); falling back to {}", req.url));
                tracing::info!("mirror unusable for {}, falling back to {}", req.name, req.url);
            }
        }
    }

    let part = part_path(archive);
    http.download(req.url, &part, log)?;
    if let Err(e) = verifier.verify(&part, req.checksum, log) {
        let _ = fs::remove_file(&part);
        return Err(e.into());
    }
    fs::rename(&part, archive)?;
    Ok(())
}

fn try_mirror(
    mirror: &str,
    checksum: Option<&Checksum>,
    http: &dyn HttpClient,
    verifier: &ChecksumVerifier,
    archive: &Path,
    log: &BuildLog,
) -> Result<(), String> {
    if !http.probe(mirror, log) {
        return Err("probe failed".to_string());
    }

    let part = part_path(archive);
    let result = http
        .download(mirror, &part, log)
        .map_err(|e| e.to_string())
        .and_then(|()| verifier.verify(&part, checksum, log).map_err(|e| e.to_string()))
        .and_then(|()| fs::rename(&part, archive).map_err(|e| e.to_string()));

    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

fn part_path(archive: &Path) -> PathBuf {
    let mut name = archive.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Clear leftovers of an earlier attempt so a re-run starts clean.
fn remove_stale(archive: &Path) -> std::io::Result<()> {
    for path in [archive.to_path_buf(), part_path(archive)] {
        if path.symlink_metadata().is_ok() {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

/// `<dest>/<name>` when the archive created it, else the single top-level
/// directory it extracted.
fn source_root(
    name: &PackageName,
    dest: &Path,
    files: &[extract::ExtractedFile],
) -> Result<PathBuf, ExtractError> {
    let named = dest.join(name);
    if named.is_dir() {
        return Ok(named);
    }

    match extract::top_level_dirs(files).as_slice() {
        [single] => Ok(dest.join(single)),
        _ => Err(ExtractError::Archive(format!(
            "archive for {name} has no {name}/ directory and no single top-level directory"
        ))),
    }
}
