//! Per-run build log.
//!
//! Every diagnostic the pipeline produces, and the combined stdout/stderr of
//! every external tool it runs, is appended to one file. The file is opened
//! in append mode so that lines written by the pipeline and output written by
//! child processes through a cloned descriptor interleave in order.

use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Handle to the build log of one run.
#[derive(Debug)]
pub struct BuildLog {
    path: PathBuf,
    file: File,
}

impl BuildLog {
    /// Create (or truncate) the log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        File::create(path)?;
        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Write failures are reported through `tracing` and
    /// otherwise ignored: losing a diagnostic line must not fail a build.
    pub fn line(&self, msg: impl Display) {
        if let Err(e) = writeln!(&self.file, "{msg}") {
            tracing::warn!("failed to write build log {}: {e}", self.path.display());
        }
    }

    /// A descriptor suitable for a child's stdout or stderr.
    ///
    /// # Errors
    ///
    /// Returns an error if the file descriptor cannot be duplicated.
    pub fn stdio(&self) -> io::Result<Stdio> {
        Ok(Stdio::from(self.file.try_clone()?))
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        std::fs::metadata(&self.path).map_or(true, |m| m.len() == 0)
    }

    /// The last `n` lines of the log.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn tail(&self, n: usize) -> io::Result<String> {
        read_last_lines(&self.path, n)
    }
}

/// Read the last N lines from a file efficiently.
///
/// Instead of loading the entire file, we seek to near the end and read a fixed-size
/// tail buffer. This prevents OOM on large build logs (e.g., compiling LLVM).
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub fn read_last_lines(path: &Path, n: usize) -> io::Result<String> {
    use std::io::{Read, Seek, SeekFrom};

    // Read at most 16KB from the end (enough for ~400 lines at 40 chars each)
    const TAIL_SIZE: u64 = 16 * 1024;

    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();

    let seek_pos = file_len.saturating_sub(TAIL_SIZE);
    file.seek(SeekFrom::Start(seek_pos))?;

    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let buffer = String::from_utf8_lossy(&bytes);

    // If we seeked mid-file, skip the first (partial) line
    let content = if seek_pos > 0 {
        buffer.find('\n').map_or(&buffer[..], |idx| &buffer[idx + 1..])
    } else {
        &buffer[..]
    };

    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(n);
    Ok(lines[start..].join("\n"))
}
