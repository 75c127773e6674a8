#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::must_use_candidate)]

pub mod format;
pub mod ledger;
pub mod lock;
pub mod queue;
pub mod reconciler;
pub mod scheduler;
pub mod supervisor;

use std::io;
use std::path::PathBuf;

/// Name of the hidden directory (relative to the working directory) holding
/// every job list's ledger and lock file.
pub const DATA_DIRECTORY_NAME: &str = ".qsup";

/// Maximum number of per-job output files placed in a single bucket directory.
pub const DEFAULT_MAX_OUT_FILES_PER_DIR: usize = 1000;

/// Maximum number of job IDs sent to the scheduler in a single status query.
pub const DEFAULT_BATCH_QUERY_SIZE: usize = 1000;

/// Seconds to sleep after the scheduler reports that it is busy.
pub const DEFAULT_BUSY_BACKOFF_SECS: u64 = 180;

/// Seconds to sleep between reconciliations during the first `DEFAULT_FAST_CYCLES` of `wait`.
pub const DEFAULT_SLEEP_SHORT_SECS: u64 = 45;

/// Seconds to sleep between reconciliations once `wait` has settled into its slow cadence.
pub const DEFAULT_SLEEP_LONG_SECS: u64 = 90;

/// Number of fast reconciliation cycles before `wait` switches to the long sleep.
pub const DEFAULT_FAST_CYCLES: u32 = 10;

/// Default cap on resubmissions before a job is considered terminal.
pub const DEFAULT_MAX_RESUBMISSIONS: u32 = 5;

/// Marker LSF writes to a job's output file when killed for exceeding the queue's
/// wall-clock limit.
pub const TERM_RUNLIMIT_MARKER: &str =
    "TERM_RUNLIMIT: job killed after reaching LSF run time limit";

/// Marker LSF writes to a job's output file on ordinary success.
pub const SUCCESS_MARKER: &str = "Successfully completed.";

/// Errors that may be encountered while supervising a job list.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    IO(#[from] io::Error),

    #[error("Unable to read '{0}': {1}")]
    FileRead(PathBuf, #[source] io::Error),

    #[error("Unable to write '{0}': {1}")]
    FileWrite(PathBuf, #[source] io::Error),

    #[error("Unable to remove '{0}': {1}")]
    FileRemove(PathBuf, #[source] io::Error),

    #[error("Unable to create directory '{0}': {1}")]
    DirectoryCreate(PathBuf, #[source] io::Error),

    #[error("Unable to read directory '{0}': {1}")]
    DirectoryRead(PathBuf, #[source] io::Error),

    #[error("Unable to remove directory '{0}': {1}")]
    DirectoryRemove(PathBuf, #[source] io::Error),

    #[error("Unable to spawn '{0}': {1}.")]
    SpawnProcess(String, #[source] io::Error),

    #[error("Unable to parse '{0}'.\n{1}")]
    TOMLParse(PathBuf, #[source] toml::de::Error),

    // usage errors
    #[error(
        "A job list named '{0}' already exists. Use 'push' on a fresh name or 'clean' it first."
    )]
    JobListExists(String),

    #[error("No job list named '{0}' was found in '{1}'.")]
    JobListNotFound(String, PathBuf),

    #[error("Queue '{0}' is not defined. Known queues: {1}.")]
    UnknownQueue(String, String),

    #[error(
        "'--no-resubmit-if-queue-max-time-exceeded' and \
         '--resubmit-to-same-queue-if-queue-max-time-exceeded' are mutually exclusive."
    )]
    ConflictingResubmitFlags,

    #[error(
        "This supervisor must run on '{0}', not '{1}'. Set HOSTNAME or disable the check in \
         the queue configuration."
    )]
    WrongHost(String, String),

    #[error(
        "There are still {0} job(s) pending or running. Rerun with --force, or 'stop' the job \
         list first."
    )]
    ForceCleanNeeded(usize),

    // ledger corruption
    #[error(
        "Job list '{0}' is corrupt: the catalog has {1} entries but the status file has {2}."
    )]
    CatalogStatusMismatch(String, usize, usize),

    #[error("Job list '{0}' is corrupt: {1} job(s) were recorded but the ledger holds {2}.")]
    CountMismatch(String, usize, usize),

    #[error("Job list '{0}' is corrupt: malformed line {1} in '{2}': {3:?}")]
    MalformedLedgerLine(String, usize, PathBuf, String),

    #[error(
        "Job list '{0}' is corrupt: job {1} transitioned from {2:?} to {3:?}, which is not a \
         valid transition."
    )]
    InvalidTransition(
        String,
        u32,
        crate::reconciler::JobState,
        crate::reconciler::JobState,
    ),

    #[error("Job list '{0}' is corrupt: job {1} finished with a negative runtime ({2}s).")]
    NegativeRuntime(String, u32, i64),

    // scheduler errors
    #[error("Error submitting command for job {0}: {1}")]
    SubmitFailed(String, String),

    #[error("Unexpected output from {0}: {1:?}")]
    UnexpectedOutput(String, String),

    #[error("Interrupted")]
    Interrupted,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
