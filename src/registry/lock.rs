//! Per-instance advisory locks.
//!
//! Each instance has a lock file at `<registry>/.locks/<name>.lock`. The
//! lock is held through an open file handle, so it is released when the
//! guard drops, even if the process dies mid-operation.

use crate::error::{Error, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lock name used for registry-wide checks (name and port uniqueness).
/// Instance names cannot start with a dot, so this never collides.
pub(crate) const REGISTRY_LOCK_NAME: &str = ".registry";

/// Guard for an exclusive advisory lock on one instance.
#[derive(Debug)]
pub struct InstanceLock {
    name: String,
    path: PathBuf,
    file: File,
}

impl InstanceLock {
    /// Poll `try_lock_exclusive` until the lock is ours or `timeout` elapses.
    pub(crate) async fn acquire(lock_dir: &Path, name: &str, timeout: Duration) -> Result<Self> {
        let path = lock_dir.join(format!("{}.lock", name));
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                Error::Persistence(format!(
                    "Failed to open lock file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        let started = Instant::now();
        loop {
            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => break,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || is_contended(&e) => {
                    if started.elapsed() >= timeout {
                        warn!(
                            "Gave up waiting for lock on '{}' after {:?}{}",
                            name,
                            timeout,
                            holder_hint(&path)
                        );
                        return Err(Error::Busy {
                            name: name.to_string(),
                            waited: timeout,
                        });
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(e) => {
                    return Err(Error::Persistence(format!(
                        "Failed to lock {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }

        // Record our PID for diagnostics; failure here is harmless
        let _ = file.set_len(0);
        let _ = writeln!(file, "{}", std::process::id());
        debug!("Acquired lock on '{}'", name);

        Ok(Self {
            name: name.to_string(),
            path,
            file,
        })
    }

    /// Name of the locked instance.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock on '{}': {}", self.name, e);
        } else {
            debug!("Released lock on '{}'", self.name);
        }
    }
}

fn is_contended(e: &std::io::Error) -> bool {
    // fs2 reports contention as the platform's lock error, not always WouldBlock
    e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn holder_hint(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(contents) if !contents.trim().is_empty() => {
            format!(" (held by PID {})", contents.trim())
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_times_out_with_busy() {
        let dir = tempfile::tempdir().unwrap();
        let _held = InstanceLock::acquire(dir.path(), "prod01", Duration::from_secs(1))
            .await
            .unwrap();

        let err = InstanceLock::acquire(dir.path(), "prod01", Duration::from_millis(120))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy { .. }));
    }

    #[tokio::test]
    async fn drop_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        {
            let _held = InstanceLock::acquire(dir.path(), "prod01", Duration::from_secs(1))
                .await
                .unwrap();
        }
        InstanceLock::acquire(dir.path(), "prod01", Duration::from_millis(100))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn different_instances_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();
        let _a = InstanceLock::acquire(dir.path(), "prod01", Duration::from_secs(1))
            .await
            .unwrap();
        InstanceLock::acquire(dir.path(), "prod02", Duration::from_millis(100))
            .await
            .unwrap();
    }
}
