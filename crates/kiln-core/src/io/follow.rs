//! Background log follower for verbose runs.
//!
//! Streams bytes appended to the build log to a writer (normally stderr)
//! while the blocking pipeline runs elsewhere. The follower is purely
//! observational: whatever happens to it, the install outcome is decided by
//! the pipeline alone.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Handle to a running follower task.
#[derive(Debug)]
pub struct LogFollower {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl LogFollower {
    /// Start following `path`, writing to stderr. Must be called from within
    /// a tokio runtime.
    pub fn spawn(path: PathBuf) -> Self {
        let token = CancellationToken::new();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = follow(path, task_token, tokio::io::stderr()).await {
                tracing::debug!("log follower stopped: {e}");
            }
        });
        Self { token, handle }
    }

    /// Flush whatever is left in the log and stop.
    pub async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.handle.await {
            tracing::debug!("log follower task failed: {e}");
        }
    }
}

/// Copy bytes appended to `path` into `out` until `token` is cancelled, then
/// drain the remainder and return the writer.
///
/// # Errors
///
/// Returns an error if reading the log or writing to `out` fails.
pub async fn follow<W>(path: PathBuf, token: CancellationToken, mut out: W) -> std::io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    let mut file = loop {
        match tokio::fs::File::open(&path).await {
            Ok(f) => break f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if token.is_cancelled() {
                    return Ok(out);
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    };

    let mut buf = vec![0u8; 8192];
    loop {
        let n = file.read(&mut buf).await?;
        if n > 0 {
            out.write_all(&buf[..n]).await?;
            out.flush().await?;
            continue;
        }
        if token.is_cancelled() {
            break;
        }
        tokio::select! {
            () = token.cancelled() => {}
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }

    Ok(out)
}
