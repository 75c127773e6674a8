//! A file-based mutex scoped to one job-list name.
//!
//! Uses an OS-level advisory lock (`fs2::FileExt`) rather than a
//! sentinel-file convention, the same primitive used elsewhere in this
//! corpus to guard single-instance access to a shared file.

use fs2::FileExt;
use log::warn;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::Error;

/// How long to wait for the lock before emitting a "previous supervisor
/// died?" hint. The call continues to block after printing it.
const STALL_WARNING: Duration = Duration::from_secs(10);

/// An exclusive lock on one job list's ledger, released on drop.
pub struct ExclusiveLock {
    file: File,
    path: PathBuf,
}

impl ExclusiveLock {
    /// Acquire the exclusive lock for `job_list_name` under `data_directory`,
    /// blocking until it is available.
    ///
    /// # Errors
    /// Returns `Err(Error)` if the lock file cannot be created or locked.
    pub fn acquire(data_directory: &std::path::Path, job_list_name: &str) -> Result<Self, Error> {
        std::fs::create_dir_all(data_directory)
            .map_err(|e| Error::DirectoryCreate(data_directory.to_path_buf(), e))?;

        let path = data_directory.join(format!("lockFile.{job_list_name}"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::FileWrite(path.clone(), e))?;

        if file.try_lock_exclusive().is_err() {
            let start = Instant::now();
            let mut warned = false;
            loop {
                if file.try_lock_exclusive().is_ok() {
                    break;
                }
                if !warned && start.elapsed() > STALL_WARNING {
                    warn!(
                        "Waiting on '{}'. If a previous supervisor died holding this \
                         lock, remove the file manually.",
                        path.display()
                    );
                    warned = true;
                }
                std::thread::sleep(Duration::from_millis(200));
            }
        }

        Ok(Self { file, path })
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!("Failed to release lock '{}': {e}", self.path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_and_release() {
        let dir = tempdir().unwrap();
        let lock = ExclusiveLock::acquire(dir.path(), "jl1").unwrap();
        drop(lock);
        // Reacquiring after drop must not block.
        let _lock = ExclusiveLock::acquire(dir.path(), "jl1").unwrap();
    }

    #[test]
    fn different_names_do_not_conflict() {
        let dir = tempdir().unwrap();
        let _a = ExclusiveLock::acquire(dir.path(), "jl1").unwrap();
        let _b = ExclusiveLock::acquire(dir.path(), "jl2").unwrap();
    }
}
