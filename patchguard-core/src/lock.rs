use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{PatchError, PatchResult};

/// Exclusive advisory lock serialising first-time patching of one target.
///
/// Lives next to the sentinel as `<sentinel>.lock` and is removed when the
/// guard drops, whether or not the job succeeded. Holders must re-check the
/// sentinel after acquiring: a process that waited may find the work done.
#[derive(Debug)]
pub struct JobLock {
    file: File,
    path: PathBuf,
}

impl JobLock {
    pub fn path_for(sentinel: &Path) -> PathBuf {
        let mut name = OsString::from(sentinel.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    pub fn acquire(sentinel: &Path) -> PatchResult<Self> {
        let path = Self::path_for(sentinel);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| PatchError::Lock {
                path: path.clone(),
                source,
            })?;

        FileExt::lock_exclusive(&file).map_err(|source| PatchError::Lock {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "Acquired patch lock");

        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobLock {
    // Unlink before unlocking, so waiters holding the old file re-check the
    // sentinel instead of racing a newcomer on a fresh lock file.
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %err, "Failed to remove patch lock file");
        }
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_file_sits_next_to_sentinel() {
        assert_eq!(
            JobLock::path_for(Path::new("/pkg/SD/src/.patched")),
            PathBuf::from("/pkg/SD/src/.patched.lock")
        );
    }

    #[test]
    fn dropping_the_guard_removes_lock_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let sentinel = dir.path().join(".patched");

        let lock = JobLock::acquire(&sentinel)?;
        assert_eq!(lock.path(), JobLock::path_for(&sentinel));
        assert!(lock.path().exists());
        drop(lock);
        assert!(!JobLock::path_for(&sentinel).exists());

        // Reacquirable once released.
        drop(JobLock::acquire(&sentinel)?);
        assert!(!JobLock::path_for(&sentinel).exists());
        Ok(())
    }

    #[test]
    fn missing_parent_directory_is_a_lock_error() {
        let err = JobLock::acquire(Path::new("/nonexistent/patchguard/dir/.patched")).err();
        assert!(matches!(err, Some(PatchError::Lock { .. })));
    }
}
