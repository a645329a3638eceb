//! File-based locking.
//!
//! Uses flock-style advisory locks for two things: only one scanban daemon
//! runs at a time, and processes sharing an unban store (the daemon and a
//! one-shot `scan`) take turns rewriting it.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub const LOCK_FILE: &str = "/run/scanban.lock";

/// A guard that holds an exclusive lock on a lock file.
/// The lock is automatically released when the guard is dropped.
pub struct LockGuard {
    _file: File,
}

impl LockGuard {
    /// Acquire the default lock. Fails if another instance is running.
    pub fn acquire() -> Result<Self> {
        Self::acquire_at(Path::new(LOCK_FILE))
    }

    /// Acquire an exclusive lock on `lock_path`, failing if it is held.
    pub fn acquire_at(lock_path: &Path) -> Result<Self> {
        let file = open_lock_file(lock_path)?;
        file.try_lock_exclusive().map_err(|_| {
            anyhow::anyhow!(
                "Another instance of scanban is already running.\n\
                 If you believe this is an error, remove the lock file: {}",
                lock_path.display()
            )
        })?;

        Ok(Self { _file: file })
    }

    /// Block until an exclusive lock on `lock_path` is granted.
    ///
    /// Holders are expected to keep the lock briefly. Call from a blocking
    /// context.
    pub fn wait_at(lock_path: &Path) -> Result<Self> {
        let file = open_lock_file(lock_path)?;
        file.lock_exclusive()
            .with_context(|| format!("Failed to lock {}", lock_path.display()))?;
        Ok(Self { _file: file })
    }
}

/// Open (creating if needed) a 0600 lock file. Opening with create instead of
/// checking for existence first avoids a race with other processes.
fn open_lock_file(lock_path: &Path) -> Result<File> {
    if let Some(parent) = lock_path.parent() {
        fs::create_dir_all(parent).ok();
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;

    fs::set_permissions(lock_path, fs::Permissions::from_mode(0o600))
        .context("Failed to set lock file permissions")?;
    Ok(file)
}
