//! Persistent, plain-text ledger of one job list: the job catalog, the
//! mutable status, saved submission parameters, and the total job count.
//!
//! Every rewrite is atomic (write to a sibling temp file, then rename), and
//! every file stays human-inspectable tab-separated text rather than a
//! binary cache format.

use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use crate::reconciler::JobState;
use crate::Error;

const JOBS_FILE: &str = "jobs";
const STATUS_FILE: &str = "status";
const PARAMS_FILE: &str = "params";
const COUNT_FILE: &str = "count";

/// An immutable (after submission) catalog entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub current_id: u32,
    pub internal_name: String,
    pub queue: String,
    pub command: String,
}

/// The mutable status of one job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobStatus {
    pub current_id: u32,
    pub internal_name: String,
    pub state: JobState,
    pub fail_count: u32,
    pub runtime: i64,
}

/// The four persistent files for one job list, plus the directory of
/// versioned backups.
pub struct LedgerStore {
    directory: PathBuf,
    keep_backups: bool,
}

impl LedgerStore {
    /// Open the ledger store rooted at `directory` (typically
    /// `.qsup/<jobListName>`). Does not touch the filesystem.
    pub fn new(directory: PathBuf, keep_backups: bool) -> Self {
        Self {
            directory,
            keep_backups,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// True if any ledger file for this job list already exists.
    pub fn exists(&self) -> bool {
        [JOBS_FILE, STATUS_FILE, PARAMS_FILE, COUNT_FILE]
            .iter()
            .any(|name| self.directory.join(name).is_file())
    }

    fn path(&self, name: &str) -> PathBuf {
        self.directory.join(name)
    }

    /// # Errors
    /// Returns `Err` if the file is missing or malformed.
    pub fn load_catalog(&self) -> Result<Vec<Job>, Error> {
        let text = read(&self.path(JOBS_FILE))?;
        parse_jobs(&self.path(JOBS_FILE), &text)
    }

    /// # Errors
    /// Returns `Err` on an I/O failure.
    pub fn save_catalog(&self, jobs: &[Job]) -> Result<(), Error> {
        use std::fmt::Write as _;
        let mut text = String::new();
        for job in jobs {
            let _ = writeln!(text, "{}\t{}\t{}\t{}", job.current_id, job.internal_name, job.queue, job.command);
        }
        self.write_atomic(JOBS_FILE, &text)
    }

    /// # Errors
    /// Returns `Err` if the file is missing or malformed.
    pub fn load_status(&self) -> Result<Vec<JobStatus>, Error> {
        let text = read(&self.path(STATUS_FILE))?;
        parse_statuses(&self.path(STATUS_FILE), &text)
    }

    /// # Errors
    /// Returns `Err` on an I/O failure.
    pub fn save_status(&self, statuses: &[JobStatus]) -> Result<(), Error> {
        use std::fmt::Write as _;
        let mut text = String::new();
        for status in statuses {
            let _ = writeln!(
                text,
                "{}\t{}\t{}\t{}\t{}",
                status.current_id, status.internal_name, status.state, status.fail_count, status.runtime
            );
        }
        self.write_atomic(STATUS_FILE, &text)
    }

    /// # Errors
    /// Returns `Err` if the file is missing.
    pub fn load_params(&self) -> Result<String, Error> {
        let text = read(&self.path(PARAMS_FILE))?;
        Ok(text.trim_end_matches('\n').to_string())
    }

    /// # Errors
    /// Returns `Err` on an I/O failure.
    pub fn save_params(&self, params: &str) -> Result<(), Error> {
        self.write_atomic(PARAMS_FILE, &format!("{params}\n"))
    }

    /// # Errors
    /// Returns `Err` if the file is missing or not a valid integer.
    pub fn load_count(&self) -> Result<usize, Error> {
        let text = read(&self.path(COUNT_FILE))?;
        let trimmed = text.trim();
        trimmed.parse().map_err(|_| {
            Error::MalformedLedgerLine(
                self.directory.display().to_string(),
                1,
                self.path(COUNT_FILE),
                trimmed.to_string(),
            )
        })
    }

    /// # Errors
    /// Returns `Err` on an I/O failure.
    pub fn save_count(&self, count: usize) -> Result<(), Error> {
        self.write_atomic(COUNT_FILE, &format!("{count}\n"))
    }

    /// Check the cross-file invariants: catalog length, status length, and
    /// the recorded total all agree.
    ///
    /// # Errors
    /// Returns `Err(Error::CatalogStatusMismatch)` or `Err(Error::CountMismatch)`.
    pub fn check_consistent(&self, job_list_name: &str, jobs: &[Job], statuses: &[JobStatus]) -> Result<(), Error> {
        if jobs.len() != statuses.len() {
            return Err(Error::CatalogStatusMismatch(
                job_list_name.to_string(),
                jobs.len(),
                statuses.len(),
            ));
        }
        let count = self.load_count()?;
        if count != jobs.len() {
            return Err(Error::CountMismatch(job_list_name.to_string(), count, jobs.len()));
        }
        Ok(())
    }

    /// Atomically write `contents` to `name`, taking a versioned backup of
    /// the previous contents first when backups are enabled.
    fn write_atomic(&self, name: &str, contents: &str) -> Result<(), Error> {
        fs::create_dir_all(&self.directory)
            .map_err(|e| Error::DirectoryCreate(self.directory.clone(), e))?;

        let target = self.path(name);

        if self.keep_backups && target.is_file() {
            self.backup(name)?;
        }

        let tmp = self.directory.join(format!("{name}.tmp"));
        fs::write(&tmp, contents).map_err(|e| Error::FileWrite(tmp.clone(), e))?;
        fs::rename(&tmp, &target).map_err(|e| Error::FileWrite(target.clone(), e))?;
        debug!("Wrote '{}'.", target.display());
        Ok(())
    }

    fn backup(&self, name: &str) -> Result<(), Error> {
        let mut n = 0;
        loop {
            let candidate = self.directory.join(format!("{name}.backup{n}"));
            if !candidate.is_file() {
                let source = self.path(name);
                fs::copy(&source, &candidate).map_err(|e| Error::FileWrite(candidate.clone(), e))?;
                return Ok(());
            }
            n += 1;
        }
    }

    /// Remove every ledger file, its backups, and the directory itself if
    /// it becomes empty.
    ///
    /// # Errors
    /// Returns `Err(Error)` if a file or the directory cannot be removed.
    pub fn remove_all(&self) -> Result<(), Error> {
        if !self.directory.is_dir() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.directory).map_err(|e| Error::DirectoryRead(self.directory.clone(), e))? {
            let entry = entry.map_err(|e| Error::DirectoryRead(self.directory.clone(), e))?;
            let path = entry.path();
            fs::remove_file(&path).map_err(|e| Error::FileRemove(path.clone(), e))?;
        }
        fs::remove_dir(&self.directory).map_err(|e| Error::DirectoryRemove(self.directory.clone(), e))?;
        Ok(())
    }
}

fn read(path: &Path) -> Result<String, Error> {
    fs::read_to_string(path).map_err(|e| Error::FileRead(path.to_path_buf(), e))
}

fn parse_jobs(path: &Path, text: &str) -> Result<Vec<Job>, Error> {
    let mut jobs = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.splitn(4, '\t');
        let (Some(id), Some(internal_name), Some(queue), Some(command)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(malformed(path, i + 1, line));
        };
        let current_id: u32 = id.parse().map_err(|_| malformed(path, i + 1, line))?;
        jobs.push(Job {
            current_id,
            internal_name: internal_name.to_string(),
            queue: queue.to_string(),
            command: command.to_string(),
        });
    }
    Ok(jobs)
}

fn parse_statuses(path: &Path, text: &str) -> Result<Vec<JobStatus>, Error> {
    let mut statuses = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 5 {
            return Err(malformed(path, i + 1, line));
        }
        let current_id: u32 = fields[0].parse().map_err(|_| malformed(path, i + 1, line))?;
        let state: JobState = fields[2].parse().map_err(|_| malformed(path, i + 1, line))?;
        let fail_count: u32 = fields[3].parse().map_err(|_| malformed(path, i + 1, line))?;
        let runtime: i64 = fields[4].parse().map_err(|_| malformed(path, i + 1, line))?;
        statuses.push(JobStatus {
            current_id,
            internal_name: fields[1].to_string(),
            state,
            fail_count,
            runtime,
        });
    }
    Ok(statuses)
}

fn malformed(path: &Path, line_number: usize, line: &str) -> Error {
    Error::MalformedLedgerLine(
        path.parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        line_number,
        path.to_path_buf(),
        line.to_string(),
    )
}

/// Compute the output bucket for job index `index`, grouping at most
/// `max_per_dir` jobs per directory.
pub fn bucket_for(index: usize, max_per_dir: usize) -> usize {
    index / max_per_dir + 1
}

/// Compute the `InternalName` (scheduler output-file path) for job `index`
/// within `job_list_name`.
pub fn internal_name(job_list_name: &str, index: usize, max_per_dir: usize) -> String {
    format!(
        "{job_list_name}/{}/o.{index}",
        bucket_for(index, max_per_dir)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_job(id: u32) -> Job {
        Job {
            current_id: id,
            internal_name: format!("jl/1/o.{id}"),
            queue: "short".into(),
            command: "echo hello".into(),
        }
    }

    fn sample_status(id: u32, state: JobState) -> JobStatus {
        JobStatus {
            current_id: id,
            internal_name: format!("jl/1/o.{id}"),
            state,
            fail_count: 0,
            runtime: -1,
        }
    }

    #[test]
    fn catalog_round_trip() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().to_path_buf(), false);
        let jobs = vec![sample_job(1), sample_job(2)];
        store.save_catalog(&jobs).unwrap();
        assert_eq!(store.load_catalog().unwrap(), jobs);
    }

    #[test]
    fn status_round_trip() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().to_path_buf(), false);
        let statuses = vec![sample_status(1, JobState::Pend), sample_status(2, JobState::Done)];
        store.save_status(&statuses).unwrap();
        assert_eq!(store.load_status().unwrap(), statuses);
    }

    #[test]
    fn params_and_count_round_trip() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().to_path_buf(), false);
        store.save_params("--mem 4G").unwrap();
        assert_eq!(store.load_params().unwrap(), "--mem 4G");
        store.save_count(7).unwrap();
        assert_eq!(store.load_count().unwrap(), 7);
    }

    #[test]
    fn backups_are_versioned() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().to_path_buf(), true);
        store.save_count(1).unwrap();
        store.save_count(2).unwrap();
        store.save_count(3).unwrap();
        assert!(dir.path().join("count.backup0").is_file());
        assert!(dir.path().join("count.backup1").is_file());
        assert_eq!(store.load_count().unwrap(), 3);
    }

    #[test]
    fn consistency_check_catches_mismatch() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().to_path_buf(), false);
        store.save_count(2).unwrap();
        let jobs = vec![sample_job(1)];
        let statuses = vec![sample_status(1, JobState::Pend)];
        assert!(store.check_consistent("jl", &jobs, &statuses).is_err());
    }

    #[test]
    fn remove_all_deletes_directory() {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().to_path_buf(), false);
        store.save_count(1).unwrap();
        store.remove_all().unwrap();
        assert!(!dir.path().exists());
    }

    #[test]
    fn bucket_assignment_caps_files_per_directory() {
        assert_eq!(bucket_for(0, 1000), 1);
        assert_eq!(bucket_for(999, 1000), 1);
        assert_eq!(bucket_for(1000, 1000), 2);
    }
}
