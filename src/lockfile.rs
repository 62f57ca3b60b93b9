//! Process-wide lock over one tracked working copy.
//!
//! The lock serializes verstamp processes operating on the same checkout; it
//! gives no cross-machine guarantee. Cross-clone writers are arbitrated by
//! the stamping protocol's optimistic retry, never by this lock.

use crate::config;
use crate::error::{Result, VerstampError};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// The lock lives inside the VCS metadata directory so it never shows up as
/// an untracked file in status checks; outside any repository (tests) it
/// falls back to the state directory.
fn lock_dir(root: &Path) -> PathBuf {
    let git = root.join(".git");
    if git.is_dir() {
        return git;
    }
    let hg = root.join(".hg");
    if hg.is_dir() {
        return hg;
    }
    config::state_dir(root)
}

/// An exclusive OS-level lock, released on drop.
#[derive(Debug)]
pub struct ProcessLock {
    path: PathBuf,
    file: Option<File>,
}

impl ProcessLock {
    /// Acquire the lock for the workspace rooted at `root`, blocking until
    /// any other verstamp process on this checkout finishes.
    pub fn acquire(root: &Path) -> Result<ProcessLock> {
        let dir = lock_dir(root);
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(config::LOCK_FILE);

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        file.lock_exclusive().map_err(|e| {
            VerstampError::backend(format!(
                "Cannot lock workspace at {}: {}",
                path.display(),
                e
            ))
        })?;

        Ok(ProcessLock {
            path,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ProcessLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock = ProcessLock::acquire(dir.path()).unwrap();
        assert!(lock.path().exists());
        drop(lock);
        // Re-acquirable after release.
        let again = ProcessLock::acquire(dir.path()).unwrap();
        drop(again);
    }
}
