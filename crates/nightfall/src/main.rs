//! Nightfall launcher
//!
//! - `close`: close an observing night (reconcile, persist, lock)
//! - `datasequence` / `calibration-sequence`: drive one run through its
//!   step table, resuming from the run's history file
//! - `history-level`: print the level a history file implies
//! - `config`: print the effective configuration

use anyhow::Result;
use clap::{Parser, Subcommand};
use nightfall_closer::CloseError;
use nightfall_logging::LogConfig;
use nightfall_protocol::RunKind;
use nightfall_runner::{RunnerError, LAUNCH_FAILURE_EXIT_CODE};
use std::path::PathBuf;
use std::process::ExitCode;

mod cli;

#[derive(Parser, Debug)]
#[command(name = "nightfall", about = "Observing night closer and sequence runner")]
struct Cli {
    /// Enable verbose logging (debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(flatten)]
    global: cli::GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Close an observing night
    Close {
        /// Close only the sequence with this run number, without locking the night
        #[arg(long = "seq")]
        sequence: Option<String>,

        /// Close without data; without a value the reason is asked for
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        reason: Option<String>,

        /// Answer yes to every question
        #[arg(short = 'y', long = "yes")]
        non_interactive: bool,

        /// Do not read the night summary
        #[arg(long)]
        no_night_summary: bool,
    },

    /// Process one data run
    Datasequence {
        /// Run number
        run: u32,

        /// Calibration run whose products this run uses
        #[arg(long = "calib-run")]
        calib_run: u32,
    },

    /// Process one pedestal/calibration run
    CalibrationSequence {
        /// Run number
        run: u32,
    },

    /// Print "<level> <exit code>" for a run's history file
    HistoryLevel {
        /// Run number
        run: u32,

        /// Run kind selecting the step table (DATA or PEDCALIB)
        #[arg(long, default_value = "DATA")]
        kind: RunKind,

        /// Read this history file instead of the run's default one
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Show the effective configuration
    Config {
        /// Print only the configuration file path
        #[arg(long)]
        path: bool,
    },
}

fn run_command(cli: Cli) -> Result<u8> {
    let global = cli.global;
    match cli.command {
        Commands::Close {
            sequence,
            reason,
            non_interactive,
            no_night_summary,
        } => cli::close::run(
            &global,
            cli::close::CloseArgs {
                sequence,
                reason,
                non_interactive,
                no_night_summary,
            },
        ),
        Commands::Datasequence { run, calib_run } => {
            cli::sequence::run_data(&global, run, calib_run)
        }
        Commands::CalibrationSequence { run } => cli::sequence::run_calibration(&global, run),
        Commands::HistoryLevel { run, kind, file } => {
            cli::sequence::history_level(&global, run, kind, file)
        }
        Commands::Config { path } => cli::config::show(&global, path),
    }
}

/// Exit status for a failed command.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(close) = err.downcast_ref::<CloseError>() {
        return match close {
            CloseError::Runner(RunnerError::Launch { .. }) => LAUNCH_FAILURE_EXIT_CODE as u8,
            other => other.exit_code(),
        };
    }
    match err.downcast_ref::<RunnerError>() {
        Some(RunnerError::Launch { .. }) => LAUNCH_FAILURE_EXIT_CODE as u8,
        _ => 1,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = nightfall_logging::init_logging(LogConfig {
        app_name: "nightfall",
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match run_command(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            match err.downcast_ref::<CloseError>() {
                Some(close) if close.is_abort() => eprintln!("{}", close),
                Some(close) => match cli::error::HelpfulError::from_close_error(close) {
                    Some(helpful) => eprint!("{}", helpful),
                    None => eprintln!("{:?}", err),
                },
                None => eprintln!("{:?}", err),
            }
            ExitCode::from(exit_code_for(&err))
        }
    }
}
