//! Abstracts the cluster scheduler's textual command interface behind a
//! typed `Scheduler` trait, so a different scheduler family can be
//! supported by swapping the implementation behind it.

pub mod fake;
pub mod lsf;

use std::collections::HashMap;

use crate::Error;

/// State the scheduler reports for a job that is still known to it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryState {
    Pend,
    Run,
}

/// The result of querying the scheduler for a batch of job IDs.
#[derive(Clone, Debug, Default)]
pub struct QueryResult {
    /// State of every ID the scheduler still recognises.
    pub states: HashMap<u32, QueryState>,
}

/// How a finished job's output classifies its termination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TerminationKind {
    Success,
    RuntimeLimit,
    OtherFailure,
}

/// Classify a job's scheduler output text by the markers defined in `lib.rs`.
pub fn classify_termination(output: &str) -> TerminationKind {
    if output.contains(crate::TERM_RUNLIMIT_MARKER) {
        TerminationKind::RuntimeLimit
    } else if output.contains(crate::SUCCESS_MARKER) {
        TerminationKind::Success
    } else {
        TerminationKind::OtherFailure
    }
}

/// Archived history of one job, consulted when it has fallen out of the
/// scheduler's live queue.
#[derive(Clone, Debug, Default)]
pub struct JobHistory {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    /// `Some(true)` if the history shows a successful completion,
    /// `Some(false)` if it shows the job exited, `None` if undetermined.
    pub succeeded: Option<bool>,
}

/// Submits, queries, and cancels jobs on an external batch scheduler.
///
/// Two implementations exist: [`lsf::LsfScheduler`], which shells out to a
/// real LSF-family installation, and [`fake::FakeScheduler`], an in-memory
/// double used to drive tests without one.
pub trait Scheduler {
    /// Submit `command` to `queue`, writing scheduler output to `output_path`.
    ///
    /// `command` is shell-escaped so it survives exactly one additional round
    /// of shell interpretation by the scheduler.
    ///
    /// # Errors
    /// Returns `Err(Error::SubmitFailed)` on a nonzero exit or a
    /// non-numeric job ID in the scheduler's response.
    fn submit(
        &self,
        queue: &str,
        parameters: &str,
        output_path: &str,
        command: &str,
    ) -> Result<u32, Error>;

    /// Query the scheduler for the state of up to `ids.len()` jobs, chunking
    /// internally at `DEFAULT_BATCH_QUERY_SIZE`. IDs absent from the result
    /// are no longer known to the scheduler.
    ///
    /// # Errors
    /// Returns `Err(Error)` on a scheduler or parse failure. A "busy, retry"
    /// signal from the scheduler is retried internally and never surfaced.
    fn query(&self, ids: &[u32]) -> Result<QueryResult, Error>;

    /// Fetch the start/end time and termination classification of `id`.
    ///
    /// # Errors
    /// Returns `Err(Error)` on a scheduler or parse failure.
    fn history(&self, id: u32) -> Result<JobHistory, Error>;

    /// Read the raw scheduler output file for `internal_name`.
    ///
    /// # Errors
    /// Returns `Err(Error)` if the output file cannot be read.
    fn output(&self, internal_name: &str) -> Result<String, Error>;

    /// Best-effort cancellation of `id`. Failures are logged, not returned.
    fn cancel(&self, id: u32);
}

/// Shell-escape `command` so that it survives exactly one additional round
/// of shell interpretation by the scheduler, which itself re-invokes a shell
/// on the submitted script.
///
/// Commands containing any of `! $ ^ & * ( ) { } " ' ?` are wrapped as
/// `sh -c '<escaped>'`; otherwise the command is wrapped in double quotes.
pub fn shell_escape(command: &str) -> String {
    const METACHARACTERS: &[char] = &['!', '$', '^', '&', '*', '(', ')', '{', '}', '"', '\'', '?'];

    if command.contains(METACHARACTERS) {
        let escaped = command.replace('\'', r"'\''");
        format!("sh -c '{escaped}'")
    } else {
        format!("\"{command}\"")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_command_is_double_quoted() {
        assert_eq!(shell_escape("echo hello"), "\"echo hello\"");
    }

    #[test]
    fn metacharacter_command_uses_sh_c() {
        let escaped = shell_escape("echo $HOME");
        assert_eq!(escaped, "sh -c 'echo $HOME'");
    }

    #[test]
    fn single_quote_survives_double_escaping() {
        let escaped = shell_escape("echo 'it'\"'\"'s'");
        assert!(escaped.starts_with("sh -c '"));
        assert!(escaped.contains(r"'\''"));
    }

    #[test]
    fn classify_runtime_limit() {
        assert_eq!(
            classify_termination(crate::TERM_RUNLIMIT_MARKER),
            TerminationKind::RuntimeLimit
        );
    }

    #[test]
    fn classify_success() {
        assert_eq!(
            classify_termination(crate::SUCCESS_MARKER),
            TerminationKind::Success
        );
    }

    #[test]
    fn classify_other_failure() {
        assert_eq!(
            classify_termination("segmentation fault"),
            TerminationKind::OtherFailure
        );
    }
}
