// Copyright (c) 2024 The Regents of the University of Michigan.
// Part of row, released under the BSD 3-Clause License.

use clap::Args;
use log::debug;
use std::error::Error;

use crate::cli::{self, GlobalOptions, PolicyArguments};
use qsup::supervisor::Supervisor;

#[derive(Args, Debug)]
pub struct Arguments {
    /// Name of the job list.
    job_list_name: String,

    /// Remove the job list even while jobs are still `PEND` or `RUN`.
    #[arg(long, display_order = 0)]
    force: bool,

    #[command(flatten)]
    policy: PolicyArguments,
}

/// Remove every ledger, backup, and output file for a job list.
///
/// # Errors
/// Returns `Err(qsup::Error::ForceCleanNeeded)` if jobs are still active and
/// `--force` was not given, or any ledger/I-O error.
pub fn clean(_options: &GlobalOptions, args: Arguments) -> Result<(), Box<dyn Error>> {
    debug!("Cleaning '{}'.", args.job_list_name);
    let scheduler = cli::lsf_scheduler()?;
    let queues = cli::queue_config()?;
    let supervisor = Supervisor::new(cli::supervisor_options(args.job_list_name, &args.policy), &scheduler, queues);
    supervisor.clean(args.force)?;
    Ok(())
}
