//! Scoped advisory locks over a named file resource
//!
//! A lock is taken on a sidecar `<resource>.lock` file so the resource itself
//! can be atomically replaced while the lock is held. Writers take an
//! exclusive lock, readers a shared one. Contention blocks without a
//! timeout; a holder that never releases stalls every other writer.

use std::ffi::OsString;
use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use crate::error::{EngramError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Guard holding an OS advisory lock until dropped.
#[derive(Debug)]
pub struct ScopedLock {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl ScopedLock {
    /// Block until an exclusive lock over `resource` is held.
    pub fn exclusive(resource: &Path) -> Result<Self> {
        Self::acquire(resource, LockMode::Exclusive)
    }

    /// Block until a shared lock over `resource` is held.
    pub fn shared(resource: &Path) -> Result<Self> {
        Self::acquire(resource, LockMode::Shared)
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Path of the sidecar lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn acquire(resource: &Path, mode: LockMode) -> Result<Self> {
        let path = lock_path_for(resource);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                EngramError::Lock(format!("Failed to open lock file {}: {e}", path.display()))
            })?;

        let attempt = match mode {
            LockMode::Exclusive => file.try_lock(),
            LockMode::Shared => file.try_lock_shared(),
        };

        match attempt {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                tracing::debug!(lock = %path.display(), ?mode, "Lock held elsewhere, waiting");
                let blocking = match mode {
                    LockMode::Exclusive => file.lock(),
                    LockMode::Shared => file.lock_shared(),
                };
                blocking.map_err(|e| {
                    EngramError::Lock(format!("Failed to lock {}: {e}", path.display()))
                })?;
            }
            Err(TryLockError::Error(e)) => {
                return Err(EngramError::Lock(format!(
                    "Failed to lock {}: {e}",
                    path.display()
                )));
            }
        }

        Ok(Self { file, path, mode })
    }
}

impl Drop for ScopedLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(lock = %self.path.display(), error = %e, "Failed to release lock");
        }
    }
}

/// `<dir>/<name>.lock` for a resource at `<dir>/<name>`.
pub fn lock_path_for(resource: &Path) -> PathBuf {
    let mut name = resource
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("resource"));
    name.push(".lock");
    resource.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn test_lock_path_for() {
        assert_eq!(
            lock_path_for(Path::new("/data/core_notes.md")),
            PathBuf::from("/data/core_notes.md.lock")
        );
    }

    #[test]
    fn test_shared_locks_coexist() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("core_notes.md");

        let first = ScopedLock::shared(&resource).unwrap();
        let second = ScopedLock::shared(&resource).unwrap();

        assert_eq!(first.mode(), LockMode::Shared);
        assert_eq!(second.mode(), LockMode::Shared);
        assert!(first.path().exists());
    }

    #[test]
    fn test_exclusive_lock_blocks_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let resource = dir.path().join("core_notes.md");

        let guard = ScopedLock::exclusive(&resource).unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let handle = {
            let resource = resource.clone();
            let acquired = Arc::clone(&acquired);
            std::thread::spawn(move || {
                let _second = ScopedLock::exclusive(&resource).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        std::thread::sleep(Duration::from_millis(150));
        assert!(!acquired.load(Ordering::SeqCst), "second writer must wait");

        drop(guard);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
