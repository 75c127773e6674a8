// Copyright (c) 2024 The Regents of the University of Michigan.
// Part of row, released under the BSD 3-Clause License.

use clap::Args;
use log::debug;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::error::Error;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

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

/// Reconcile a job list in a loop until it is done.
///
/// # Errors
/// Returns `Err` if the job list does not exist, is corrupt, or the process
/// is interrupted.
pub fn wait(_options: &GlobalOptions, args: Arguments) -> Result<AllDone, Box<dyn Error>> {
    debug!("Waiting on '{}'.", args.job_list_name);
    let scheduler = cli::lsf_scheduler()?;
    let queues = cli::queue_config()?;

    let should_terminate = Arc::new(AtomicBool::new(false));
    flag::register_conditional_shutdown(SIGINT, 10, Arc::clone(&should_terminate))?;
    flag::register(SIGINT, Arc::clone(&should_terminate))?;
    flag::register_conditional_shutdown(SIGTERM, 10, Arc::clone(&should_terminate))?;
    flag::register(SIGTERM, Arc::clone(&should_terminate))?;

    let supervisor = Supervisor::new(cli::supervisor_options(args.job_list_name, &args.policy), &scheduler, queues);
    Ok(supervisor.wait(&should_terminate)?)
}
