#![warn(clippy::pedantic)]

use clap::Parser;
use log::error;
use qsup::reconciler::AllDone;
use std::error::Error;
use std::io;
use std::process::ExitCode;

mod cli;
mod ui;

use cli::{ColorMode, Commands, Options};

/// Run the selected action. Returns whether the process should exit 0:
/// always true except for `check`/`wait`/`make` when the job list is not
/// (yet, or ever going to be) fully done.
fn main_detail() -> Result<bool, Box<dyn Error>> {
    let options = Options::parse();

    let log_style = match options.global.color {
        ColorMode::Never => {
            console::set_colors_enabled(false);
            "never"
        }
        ColorMode::Always => {
            console::set_colors_enabled(true);
            "always"
        }
        ColorMode::Auto => "auto",
    };

    let log_level = match options.verbose.log_level_filter() {
        clap_verbosity_flag::LevelFilter::Off => "off",
        clap_verbosity_flag::LevelFilter::Error => "error",
        clap_verbosity_flag::LevelFilter::Warn => "warn",
        clap_verbosity_flag::LevelFilter::Info => "info",
        clap_verbosity_flag::LevelFilter::Debug => "debug",
        clap_verbosity_flag::LevelFilter::Trace => "trace",
    };

    let env = env_logger::Env::default()
        .filter_or("QSUP_LOG", log_level)
        .write_style_or("QSUP_LOG", log_style);

    env_logger::Builder::from_env(env).format_timestamp(None).try_init()?;

    let stdout = io::stdout();
    let mut output = stdout.lock();

    let all_done = match options.command {
        Some(Commands::Make(args)) => Some(cli::make::make(&options.global, args)?),
        Some(Commands::Push(args)) => {
            cli::push::push(&options.global, args)?;
            None
        }
        Some(Commands::PushCrashed(args)) => {
            cli::push_crashed::push_crashed(&options.global, args)?;
            None
        }
        Some(Commands::Check(args)) => Some(cli::check::check(&options.global, args)?),
        Some(Commands::Wait(args)) => Some(cli::wait::wait(&options.global, args)?),
        Some(Commands::Stop(args)) => {
            cli::stop::stop(&options.global, args)?;
            None
        }
        Some(Commands::Chill(args)) => {
            cli::chill::chill(&options.global, args)?;
            None
        }
        Some(Commands::Time(args)) => {
            cli::time::time(&options.global, args, &mut output)?;
            None
        }
        Some(Commands::Crashed(args)) => {
            cli::crashed::crashed(&options.global, args)?;
            None
        }
        Some(Commands::Clean(args)) => {
            cli::clean::clean(&options.global, args)?;
            None
        }
        None => None,
    };

    Ok(match all_done {
        Some(status) => status == AllDone::AllDone,
        None => true,
    })
}

fn main() -> ExitCode {
    match main_detail() {
        Err(error) => {
            error!("{error}");
            ExitCode::FAILURE
        }
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
    }
}
