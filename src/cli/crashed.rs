// Copyright (c) 2024 The Regents of the University of Michigan.
// Part of row, released under the BSD 3-Clause License.

use clap::Args;
use log::{debug, info};
use std::error::Error;
use std::path::PathBuf;

use crate::cli::{self, GlobalOptions, PolicyArguments};
use qsup::supervisor::Supervisor;

#[derive(Args, Debug)]
pub struct Arguments {
    /// Name of the job list.
    job_list_name: String,

    /// File to write each crashed job's command to, one per line.
    output_file: PathBuf,

    #[command(flatten)]
    policy: PolicyArguments,
}

/// Reconcile a job list and write the command of every `EXIT` job to a file.
///
/// # Errors
/// Returns `Err` if the job list does not exist, is corrupt, or the output
/// file cannot be written.
pub fn crashed(_options: &GlobalOptions, args: Arguments) -> Result<(), Box<dyn Error>> {
    debug!("Listing crashed jobs in '{}'.", args.job_list_name);
    let scheduler = cli::lsf_scheduler()?;
    let queues = cli::queue_config()?;
    let supervisor = Supervisor::new(cli::supervisor_options(args.job_list_name, &args.policy), &scheduler, queues);
    let count = supervisor.crashed(&args.output_file)?;
    info!("Wrote {count} crashed command(s) to '{}'.", args.output_file.display());
    Ok(())
}
