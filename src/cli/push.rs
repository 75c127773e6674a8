// Copyright (c) 2024 The Regents of the University of Michigan.
// Part of row, released under the BSD 3-Clause License.

use clap::Args;
use log::debug;
use std::error::Error;
use std::path::PathBuf;

use crate::cli::{self, GlobalOptions, PolicyArguments};
use qsup::supervisor::Supervisor;

#[derive(Args, Debug)]
pub struct Arguments {
    /// Name of the job list.
    job_list_name: String,

    /// File with one shell command per line.
    job_list_file: PathBuf,

    /// Queue to submit to.
    #[arg(short, long, display_order = 0)]
    queue: Option<String>,

    /// Opaque additional submission parameters, passed through to `bsub` verbatim.
    #[arg(short, long, default_value_t = String::new(), display_order = 0)]
    parameters: String,

    #[command(flatten)]
    policy: PolicyArguments,
}

/// Submit a new job list without waiting for it to finish.
///
/// # Errors
/// Returns `Err` if the job list already exists, the queue is unknown, or
/// submission fails.
pub fn push(_options: &GlobalOptions, args: Arguments) -> Result<(), Box<dyn Error>> {
    debug!("Pushing '{}'.", args.job_list_name);
    let commands = cli::read_commands(&args.job_list_file)?;
    let scheduler = cli::lsf_scheduler()?;
    let queues = cli::queue_config()?;
    let queue = args.queue.clone().unwrap_or_else(|| queues.default_queue().to_string());

    let supervisor = Supervisor::new(cli::supervisor_options(args.job_list_name, &args.policy), &scheduler, queues);
    supervisor.push(&commands, &queue, &args.parameters)?;

    Ok(())
}
