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

    #[command(flatten)]
    policy: PolicyArguments,
}

/// Reconcile a job list once and resubmit every currently retriable job.
///
/// # Errors
/// Returns `Err` if the job list does not exist or is corrupt.
pub fn push_crashed(_options: &GlobalOptions, args: Arguments) -> Result<(), Box<dyn Error>> {
    debug!("Pushing crashed jobs in '{}'.", args.job_list_name);
    let scheduler = cli::lsf_scheduler()?;
    let queues = cli::queue_config()?;
    let supervisor = Supervisor::new(cli::supervisor_options(args.job_list_name, &args.policy), &scheduler, queues);
    supervisor.push_crashed()?;
    Ok(())
}
