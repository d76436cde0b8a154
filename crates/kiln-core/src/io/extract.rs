//! Archive extraction module
//!
//! Handles tar.gz, tar.bz2, tar.xz, tar.zst, plain tar and zip.

use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use zip::ZipArchive;
use zstd::stream::Decoder as ZstdDecoder;

/// Errors from unpacking an archive.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Reading the archive or writing the tree failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The filename matches no known archive extension.
    #[error("Unsupported archive format: {0}")]
    UnsupportedFormat(String),

    /// The archive is corrupt or holds an entry that would land outside the
    /// destination.
    #[error("Archive error: {0}")]
    Archive(String),
}

/// Archive container and compression, detected from the filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// `.tar.gz` or `.tgz`
    TarGz,
    /// `.tar.bz2` or `.tbz2`
    TarBz2,
    /// `.tar.xz` or `.txz`
    TarXz,
    /// `.tar.zst` or `.tzst`
    TarZst,
    /// Uncompressed `.tar`
    Tar,
    /// `.zip`
    Zip,
}

/// Information about an extracted entry
#[derive(Debug, Clone)]
pub struct ExtractedFile {
    /// Path relative to extraction root
    pub relative_path: PathBuf,
    /// Absolute path on disk
    pub absolute_path: PathBuf,
    /// Whether this is an executable
    pub is_executable: bool,
}

/// Detect archive format from file extension
pub fn detect_format(path: &Path) -> Option<ArchiveFormat> {
    let path_str = path.to_string_lossy().to_lowercase();

    if path_str.ends_with(".tar.gz") || path_str.ends_with(".tgz") {
        Some(ArchiveFormat::TarGz)
    } else if path_str.ends_with(".tar.bz2") || path_str.ends_with(".tbz2") {
        Some(ArchiveFormat::TarBz2)
    } else if path_str.ends_with(".tar.xz") || path_str.ends_with(".txz") {
        Some(ArchiveFormat::TarXz)
    } else if path_str.ends_with(".tar.zst") || path_str.ends_with(".tzst") {
        Some(ArchiveFormat::TarZst)
    } else if path_str.ends_with(".tar") {
        Some(ArchiveFormat::Tar)
    } else if path_str.ends_with(".zip") {
        Some(ArchiveFormat::Zip)
    } else {
        None
    }
}

/// Extract an archive, auto-detecting format
///
/// # Errors
///
/// Returns `ExtractError::UnsupportedFormat` for an unknown extension and
/// `ExtractError::Archive` for a corrupt archive or an entry that would land
/// outside `dest_dir`.
pub fn extract_auto(
    archive_path: &Path,
    dest_dir: &Path,
) -> Result<Vec<ExtractedFile>, ExtractError> {
    let format = detect_format(archive_path).ok_or_else(|| {
        ExtractError::UnsupportedFormat(archive_path.display().to_string())
    })?;

    // `File::open` follows symlinks, so cache-linked archives read through.
    let reader = BufReader::new(File::open(archive_path)?);
    match format {
        ArchiveFormat::TarGz => extract_tar(flate2::read::GzDecoder::new(reader), dest_dir),
        ArchiveFormat::TarBz2 => extract_tar(bzip2::read::BzDecoder::new(reader), dest_dir),
        ArchiveFormat::TarXz => extract_tar(xz2::read::XzDecoder::new(reader), dest_dir),
        ArchiveFormat::TarZst => extract_tar(ZstdDecoder::new(reader)?, dest_dir),
        ArchiveFormat::Tar => extract_tar(reader, dest_dir),
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir),
    }
}

/// Reject absolute paths and `..` so nothing lands outside `dest_dir`.
fn sanitize(path: &Path) -> Result<PathBuf, ExtractError> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractError::Archive(format!(
                    "Invalid path in archive: {}",
                    path.display()
                )));
            }
        }
    }
    Ok(clean)
}

/// Extract a tar archive from a reader
fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> Result<Vec<ExtractedFile>, ExtractError> {
    fs::create_dir_all(dest_dir)?;

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    let mut extracted_files = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let relative_path = sanitize(&entry.path()?)?;
        if relative_path.as_os_str().is_empty() {
            continue;
        }

        // `unpack_in` refuses to write through symlinks that leave `dest_dir`.
        let unpacked = entry.unpack_in(dest_dir).map_err(|e| {
            ExtractError::Archive(format!("{}: {e}", relative_path.display()))
        })?;
        if !unpacked {
            return Err(ExtractError::Archive(format!(
                "Entry escapes destination: {}",
                relative_path.display()
            )));
        }

        if entry.header().entry_type().is_dir() {
            continue;
        }

        let is_executable = entry
            .header()
            .mode()
            .map(|m| m & 0o111 != 0)
            .unwrap_or(false);

        extracted_files.push(ExtractedFile {
            absolute_path: dest_dir.join(&relative_path),
            relative_path,
            is_executable,
        });
    }

    Ok(extracted_files)
}

/// Extract a zip archive
fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<Vec<ExtractedFile>, ExtractError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| ExtractError::Archive(e.to_string()))?;

    fs::create_dir_all(dest_dir)?;
    let mut extracted_files = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ExtractError::Archive(e.to_string()))?;
        let Some(relative_path) = file.enclosed_name() else {
            continue;
        };

        if file.is_dir() {
            fs::create_dir_all(dest_dir.join(&relative_path))?;
            continue;
        }

        let absolute_path = dest_dir.join(&relative_path);
        if let Some(p) = absolute_path.parent() {
            fs::create_dir_all(p)?;
        }

        let mut outfile = File::create(&absolute_path)?;
        io::copy(&mut file, &mut outfile)?;

        #[cfg(unix)]
        let is_executable = if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&absolute_path, fs::Permissions::from_mode(mode))?;
            mode & 0o111 != 0
        } else {
            false
        };
        #[cfg(not(unix))]
        let is_executable = false;

        extracted_files.push(ExtractedFile {
            relative_path,
            absolute_path,
            is_executable,
        });
    }

    Ok(extracted_files)
}

/// Distinct first path components among extracted entries, sorted.
pub fn top_level_dirs(files: &[ExtractedFile]) -> Vec<PathBuf> {
    let mut tops: Vec<PathBuf> = files
        .iter()
        .filter(|f| f.relative_path.components().count() > 1)
        .filter_map(|f| f.relative_path.components().next())
        .map(|c| PathBuf::from(c.as_os_str()))
        .collect();
    tops.sort();
    tops.dedup();
    tops
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use tempfile::tempdir;

    fn write_tar_gz(path: &Path, entries: &[(&str, &[u8], u32)]) {
        let file = File::create(path).unwrap();
        let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
        for (name, data, mode) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("foo.tar.gz")), Some(ArchiveFormat::TarGz));
        assert_eq!(detect_format(Path::new("foo.tgz")), Some(ArchiveFormat::TarGz));
        assert_eq!(detect_format(Path::new("foo.tar.bz2")), Some(ArchiveFormat::TarBz2));
        assert_eq!(detect_format(Path::new("foo.tar.xz")), Some(ArchiveFormat::TarXz));
        assert_eq!(detect_format(Path::new("foo.tar.zst")), Some(ArchiveFormat::TarZst));
        assert_eq!(detect_format(Path::new("archive.tar")), Some(ArchiveFormat::Tar));
        assert_eq!(detect_format(Path::new("BAZ.ZIP")), Some(ArchiveFormat::Zip));
        assert_eq!(detect_format(Path::new("foo")), None);
    }

    #[test]
    fn test_extract_tar_gz_preserves_modes() {
        let dir = tempdir().unwrap();
        let archive = dir.path().join("foo-1.0.tar.gz");
        write_tar_gz(
            &archive,
            &[
                ("foo-1.0/configure", b"#!/bin/sh\n", 0o755),
                ("foo-1.0/README", b"hello", 0o644),
            ],
        );

        let dest = dir.path().join("out");
        let files = extract_auto(&archive, &dest).unwrap();

        assert_eq!(files.len(), 2);
        let configure = files
            .iter()
            .find(|f| f.relative_path.ends_with("configure"))
            .unwrap();
        assert!(configure.is_executable);
        assert_eq!(fs::read_to_string(dest.join("foo-1.0/README")).unwrap(), "hello");
        assert_eq!(top_level_dirs(&files), vec![PathBuf::from("foo-1.0")]);
    }

    #[test]
    fn test_unsupported_format() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("foo.rar");
        fs::write(&src, b"x").unwrap();
        assert!(matches!(
            extract_auto(&src, &dir.path().join("out")),
            Err(ExtractError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_corrupt_archive() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("foo.tar.gz");
        fs::write(&src, b"definitely not gzip").unwrap();
        assert!(extract_auto(&src, &dir.path().join("out")).is_err());
    }

    #[test]
    #[cfg(unix)]
    fn test_symlink_entry_cannot_redirect_writes() {
        let dir = tempdir().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();

        let archive = dir.path().join("foo-1.0.tar");
        let mut builder = tar::Builder::new(File::create(&archive).unwrap());
        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        link.set_mode(0o777);
        builder.append_link(&mut link, "foo-1.0/link", &outside).unwrap();
        let mut file = tar::Header::new_gnu();
        file.set_size(5);
        file.set_mode(0o644);
        file.set_cksum();
        builder
            .append_data(&mut file, "foo-1.0/link/escaped", &b"owned"[..])
            .unwrap();
        builder.into_inner().unwrap();

        let result = extract_auto(&archive, &dir.path().join("out"));

        assert!(matches!(result, Err(ExtractError::Archive(_))), "{result:?}");
        assert!(!outside.join("escaped").exists());
    }

    #[test]
    fn test_sanitize_rejects_escape() {
        assert!(sanitize(Path::new("../etc/passwd")).is_err());
        assert!(sanitize(Path::new("/etc/passwd")).is_err());
        assert_eq!(
            sanitize(Path::new("./foo/bar")).unwrap(),
            PathBuf::from("foo/bar")
        );
    }
}
