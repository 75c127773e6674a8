// Copyright (c) 2024 The Regents of the University of Michigan.
// Part of row, released under the BSD 3-Clause License.

pub mod check;
pub mod chill;
pub mod clean;
pub mod crashed;
pub mod make;
pub mod push;
pub mod push_crashed;
pub mod stop;
pub mod time;
pub mod wait;

use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use qsup::queue::Configuration as QueueConfig;
use qsup::reconciler::Policy;
use qsup::scheduler::lsf::LsfScheduler;
use qsup::supervisor::Options as SupervisorOptions;
use qsup::Error;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None, subcommand_required = true)]
pub struct Options {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalOptions {
    /// When to print colored output.
    #[arg(long, value_name="WHEN", value_enum, default_value_t=ColorMode::Auto, global=true, env="QSUP_COLOR", display_order=2)]
    pub color: ColorMode,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum ColorMode {
    /// Automatically detect when to print colored output.
    Auto,

    /// Always print colored output.
    Always,

    /// Never print colored output.
    Never,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Push a job list and wait for it to finish.
    ///
    /// `qsup make` reads one shell command per line from JOBLISTFILE, submits
    /// each as an independent job under JOBLISTNAME, then reconciles in a
    /// loop until every job is `DONE` or the job list has hard-failed.
    ///
    /// EXAMPLES
    ///
    /// * Submit and wait for all jobs in `commands.txt` in the `short` queue:
    ///
    ///   qsup make jl1 commands.txt --queue short
    ///
    Make(make::Arguments),

    /// Submit a new job list without waiting.
    ///
    /// `qsup push` reads one shell command per line from JOBLISTFILE and
    /// submits each as an independent job under JOBLISTNAME. Fails if a job
    /// list by that name already exists.
    ///
    /// EXAMPLES
    ///
    /// * Submit all jobs in `commands.txt` in the `long` queue:
    ///
    ///   qsup push jl1 commands.txt --queue long
    ///
    Push(push::Arguments),

    /// Resubmit the currently retriable jobs in JOBLISTNAME.
    ///
    /// `qsup push-crashed` reconciles the job list, then resubmits every job
    /// that crashed and was classified as retriable, without waiting.
    #[command(name = "push-crashed")]
    PushCrashed(push_crashed::Arguments),

    /// Reconcile JOBLISTNAME once and report whether it is all done.
    ///
    /// Exits 0 if every job is `DONE`, nonzero otherwise.
    Check(check::Arguments),

    /// Reconcile JOBLISTNAME in a loop until it is done.
    ///
    /// Resubmits retriable failures as they are discovered, sleeping between
    /// reconciliations with a two-tier backoff.
    Wait(wait::Arguments),

    /// Cancel every `PEND` and `RUN` job in JOBLISTNAME.
    Stop(stop::Arguments),

    /// Cancel every `PEND` job in JOBLISTNAME, leaving running jobs alone.
    Chill(chill::Arguments),

    /// Report runtime statistics and an ETA for JOBLISTNAME.
    Time(time::Arguments),

    /// Write the command of every `EXIT` job in JOBLISTNAME to OUTPUTFILE.
    Crashed(crashed::Arguments),

    /// Remove every ledger, backup, and output file for JOBLISTNAME.
    ///
    /// Refuses while any job is `PEND` or `RUN` unless `--force` is given.
    Clean(clean::Arguments),
}

/// Flags shared by every action: the resubmission policy and backup retention.
#[derive(Args, Debug, Clone)]
pub struct PolicyArguments {
    /// Maximum number of times a crashed job is resubmitted before it is
    /// considered terminal.
    #[arg(long, value_name = "N", default_value_t = qsup::DEFAULT_MAX_RESUBMISSIONS, display_order = 1)]
    max_resubmissions: u32,

    /// Do not resubmit a job that exceeded its queue's wall-clock limit;
    /// treat it as terminal instead of promoting it.
    #[arg(long, display_order = 1, conflicts_with = "resubmit_to_same_queue_if_queue_max_time_exceeded")]
    no_resubmit_if_queue_max_time_exceeded: bool,

    /// Resubmit a job that exceeded its queue's wall-clock limit to the same
    /// queue instead of promoting it to the next one.
    #[arg(long, display_order = 1)]
    resubmit_to_same_queue_if_queue_max_time_exceeded: bool,

    /// Keep a versioned backup of every ledger file before rewriting it.
    #[arg(long, display_order = 1)]
    keep_backup_files: bool,
}

impl PolicyArguments {
    fn policy(&self) -> Policy {
        Policy {
            max_resubmissions: self.max_resubmissions,
            no_resubmit_if_queue_max_time_exceeded: self.no_resubmit_if_queue_max_time_exceeded,
            resubmit_to_same_queue_if_queue_max_time_exceeded: self
                .resubmit_to_same_queue_if_queue_max_time_exceeded,
        }
    }
}

/// Build the `supervisor::Options` shared by every action from its job list
/// name and policy flags.
pub(crate) fn supervisor_options(job_list_name: String, policy_args: &PolicyArguments) -> SupervisorOptions {
    SupervisorOptions {
        data_directory: data_directory(),
        job_list_name,
        keep_backup_files: policy_args.keep_backup_files,
        max_out_files_per_dir: qsup::DEFAULT_MAX_OUT_FILES_PER_DIR,
        policy: policy_args.policy(),
    }
}

/// The directory holding every job list's ledger, rooted in the current
/// working directory.
pub(crate) fn data_directory() -> PathBuf {
    Path::new(qsup::DATA_DIRECTORY_NAME).to_path_buf()
}

/// Build the `LsfScheduler` used by every action, keyed on the `USER`
/// environment variable (used to filter `bjobs` output to this user's jobs).
///
/// # Errors
/// Returns `Err(Error)` if `USER` is not set.
pub(crate) fn lsf_scheduler() -> Result<LsfScheduler, Error> {
    let user = env::var("USER").map_err(|_| Error::UnexpectedOutput("USER".into(), "not set".into()))?;
    Ok(LsfScheduler::new(user))
}

/// Load the queue configuration from `queues.toml`, falling back to the
/// built-in defaults.
///
/// # Errors
/// Returns `Err(Error)` when a `queues.toml` is found but cannot be parsed.
pub(crate) fn queue_config() -> Result<QueueConfig, Error> {
    QueueConfig::open()
}

/// Read one shell command per non-empty line from `path`.
///
/// # Errors
/// Returns `Err(Error::FileRead)` if `path` cannot be read.
pub(crate) fn read_commands(path: &Path) -> Result<Vec<String>, Error> {
    let text = fs::read_to_string(path).map_err(|e| Error::FileRead(path.to_path_buf(), e))?;
    Ok(text.lines().filter(|l| !l.trim().is_empty()).map(str::to_string).collect())
}
