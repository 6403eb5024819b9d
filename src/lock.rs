//! Advisory file locks with bounded waits.
//!
//! Readers take a shared lock, writers an exclusive one. Acquisition polls
//! a non-blocking lock until the timeout expires and then fails with
//! [`ResolutionError::LockTimeout`]; nothing blocks indefinitely.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use fs4::FileExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{ResolutionError, Result};

/// Default time to wait for a lock.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Shared,
    Exclusive,
}

impl LockKind {
    fn try_lock(self, file: &std::fs::File) -> std::io::Result<()> {
        match self {
            LockKind::Shared => FileExt::try_lock_shared(file),
            LockKind::Exclusive => FileExt::try_lock_exclusive(file),
        }
    }

    fn describe(self) -> &'static str {
        match self {
            LockKind::Shared => "read",
            LockKind::Exclusive => "write",
        }
    }
}

/// An open file holding an advisory lock; the lock is released on drop.
#[derive(Debug)]
pub struct LockedFile {
    file: std::fs::File,
}

impl LockedFile {
    /// Open `path` for reading under a shared lock.
    pub async fn shared(path: &Path, timeout: Duration) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::acquire(file, LockKind::Shared, path, timeout).await
    }

    /// Open (creating if needed) `path` for writing under an exclusive lock.
    ///
    /// The file is not truncated until the lock is held.
    pub async fn exclusive(path: &Path, timeout: Duration) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;
        Self::acquire(file, LockKind::Exclusive, path, timeout).await
    }

    async fn acquire(
        file: std::fs::File,
        kind: LockKind,
        path: &Path,
        timeout: Duration,
    ) -> Result<Self> {
        let deadline = Instant::now() + timeout;

        loop {
            match kind.try_lock(&file) {
                Ok(()) => return Ok(Self { file }),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                Err(err) => return Err(ResolutionError::Io(err)),
            }
            if Instant::now() >= deadline {
                return Err(ResolutionError::LockTimeout {
                    path: path.to_path_buf(),
                    kind: kind.describe(),
                    timeout_seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub async fn read_to_end(self) -> Result<Vec<u8>> {
        let mut file = tokio::fs::File::from_std(self.file);
        let mut contents = Vec::new();
        file.read_to_end(&mut contents).await?;
        Ok(contents)
    }

    /// Replace the file's contents, optionally stamping its modification time.
    pub async fn replace_contents(self, contents: &[u8], modified: Option<SystemTime>) -> Result<()> {
        let mut file = tokio::fs::File::from_std(self.file);
        file.set_len(0).await?;
        file.write_all(contents).await?;
        file.flush().await?;

        let file = file.into_std().await;
        if let Some(modified) = modified {
            file.set_modified(modified)?;
        }
        file.sync_all()?;
        Ok(())
    }
}

/// Read a whole file under a shared lock.
pub async fn read_locked(path: &Path, timeout: Duration) -> Result<Vec<u8>> {
    LockedFile::shared(path, timeout).await?.read_to_end().await
}

/// Overwrite a file under an exclusive lock.
pub async fn write_locked(path: &Path, contents: &[u8], timeout: Duration) -> Result<()> {
    LockedFile::exclusive(path, timeout)
        .await?
        .replace_contents(contents, None)
        .await
}
