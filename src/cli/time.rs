// Copyright (c) 2024 The Regents of the University of Michigan.
// Part of row, released under the BSD 3-Clause License.

use clap::Args;
use console::Style;
use log::debug;
use std::error::Error;
use std::io::Write;
use std::time::Duration;

use crate::cli::{self, GlobalOptions, PolicyArguments};
use qsup::format::HumanDuration;
use qsup::supervisor::{Supervisor, TimeReport};
use crate::ui::{Alignment, Item, Row, Table};

#[derive(Args, Debug)]
pub struct Arguments {
    /// Name of the job list.
    job_list_name: String,

    #[command(flatten)]
    policy: PolicyArguments,
}

fn humanize_secs(secs: i64) -> String {
    HumanDuration(Duration::from_secs(secs.max(0).unsigned_abs())).to_string()
}

fn make_row(report: &TimeReport) -> Vec<Item> {
    let mut result = vec![
        Item::new(humanize_secs(report.sum), Style::new()),
        Item::new(
            HumanDuration(Duration::from_secs_f64(report.mean.max(0.0))).to_string(),
            Style::new(),
        )
        .with_alignment(Alignment::Right),
        Item::new(humanize_secs(report.max_finished), Style::new()).with_alignment(Alignment::Right),
        Item::new(humanize_secs(report.max_running), Style::new()).with_alignment(Alignment::Right),
    ];

    let eta_text = report.eta.map_or_else(
        || "-".to_string(),
        |eta| HumanDuration(Duration::from_secs_f64(eta.max(0.0))).to_string(),
    );
    result.push(Item::new(eta_text, Style::new().italic()).with_alignment(Alignment::Right));

    result
}

/// Reconcile a job list and report runtime statistics and an ETA.
///
/// # Errors
/// Returns `Err` if the job list does not exist or is corrupt.
pub fn time<W: Write>(_options: &GlobalOptions, args: Arguments, output: &mut W) -> Result<(), Box<dyn Error>> {
    debug!("Timing '{}'.", args.job_list_name);
    let scheduler = cli::lsf_scheduler()?;
    let queues = cli::queue_config()?;
    let supervisor = Supervisor::new(cli::supervisor_options(args.job_list_name, &args.policy), &scheduler, queues);
    let report = supervisor.time()?;

    let underlined = Style::new().underlined();
    let mut table = Table::new();
    table.header = vec![
        Item::new("Total".to_string(), underlined.clone()).with_alignment(Alignment::Right),
        Item::new("Mean".to_string(), underlined.clone()).with_alignment(Alignment::Right),
        Item::new("Max finished".to_string(), underlined.clone()).with_alignment(Alignment::Right),
        Item::new("Max running".to_string(), underlined.clone()).with_alignment(Alignment::Right),
        Item::new("ETA".to_string(), underlined).with_alignment(Alignment::Right),
    ];
    table.rows.push(Row::Items(make_row(&report)));
    table.write(output)?;
    output.flush()?;

    Ok(())
}
