// Copyright (c) 2024 The Regents of the University of Michigan.
// Part of row, released under the BSD 3-Clause License.

use clap::Args;
use log::debug;
use std::error::Error;

use crate::cli::{self, GlobalOptions, PolicyArguments};
use qsup::reconciler::AllDone;
use qsup::supervisor::Supervisor;

#[derive(Args, Debug)]
pub struct Arguments {
    /// Name of the job list.
    job_list_name: String,

    #[command(flatten)]
    policy: PolicyArguments,
}

/// Reconcile a job list once and report whether it is all done.
///
/// # Errors
/// Returns `Err` if the job list does not exist or is corrupt.
pub fn check(_options: &GlobalOptions, args: Arguments) -> Result<AllDone, Box<dyn Error>> {
    debug!("Checking '{}'.", args.job_list_name);
    let scheduler = cli::lsf_scheduler()?;
    let queues = cli::queue_config()?;
    let supervisor = Supervisor::new(cli::supervisor_options(args.job_list_name, &args.policy), &scheduler, queues);
    Ok(supervisor.check()?)
}
