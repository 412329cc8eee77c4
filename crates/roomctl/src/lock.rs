//! Single-instance guard.
//!
//! An exclusive advisory lock on a file in the temp directory. The lock is
//! held for as long as the returned [`InstanceLock`] lives and is released
//! by the OS when the process exits.

use std::fs::File;
use std::fs::OpenOptions;
use std::fs::TryLockError;
use std::path::Path;
use std::path::PathBuf;

pub const LOCK_FILE_NAME: &str = "roomctl.lock";

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Another instance is already running (lock held on {0})")]
    AlreadyRunning(PathBuf),

    #[error("Failed to lock {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
    _file: File,
}

impl InstanceLock {
    /// Lock the default file in the system temp directory.
    pub fn acquire_default() -> Result<Self, LockError> {
        Self::acquire(std::env::temp_dir().join(LOCK_FILE_NAME))
    }

    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| LockError::Io(path.clone(), e))?;

        lock_exclusive(&file, &path)?;
        tracing::debug!("Holding instance lock {}", path.display());

        Ok(Self { path, _file: file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_exclusive(file: &File, path: &Path) -> Result<(), LockError> {
    match file.try_lock() {
        Ok(()) => Ok(()),
        Err(TryLockError::WouldBlock) => Err(LockError::AlreadyRunning(path.to_path_buf())),
        Err(TryLockError::Error(e)) => Err(LockError::Io(path.to_path_buf(), e)),
    }
}
