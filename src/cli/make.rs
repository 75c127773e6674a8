// Copyright (c) 2024 The Regents of the University of Michigan.
// Part of row, released under the BSD 3-Clause License.

use clap::Args;
use log::debug;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::cli::{self, GlobalOptions, PolicyArguments};
use qsup::reconciler::AllDone;
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

/// Push a new job list and wait for it to finish.
///
/// # Errors
/// Returns `Err` if the job list already exists, the queue is unknown,
/// submission fails, or the process is interrupted.
pub fn make(_options: &GlobalOptions, args: Arguments) -> Result<AllDone, Box<dyn Error>> {
    debug!("Making '{}'.", args.job_list_name);
    let commands = cli::read_commands(&args.job_list_file)?;
    let scheduler = cli::lsf_scheduler()?;
    let queues = cli::queue_config()?;
    let queue = args.queue.clone().unwrap_or_else(|| queues.default_queue().to_string());

    let should_terminate = Arc::new(AtomicBool::new(false));
    flag::register_conditional_shutdown(SIGINT, 10, Arc::clone(&should_terminate))?;
    flag::register(SIGINT, Arc::clone(&should_terminate))?;
    flag::register_conditional_shutdown(SIGTERM, 10, Arc::clone(&should_terminate))?;
    flag::register(SIGTERM, Arc::clone(&should_terminate))?;

    let supervisor = Supervisor::new(cli::supervisor_options(args.job_list_name, &args.policy), &scheduler, queues);
    let all_done = supervisor.make(&commands, &queue, &args.parameters, &should_terminate)?;

    Ok(all_done)
}
