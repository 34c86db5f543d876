//! Per-run commands: `datasequence`, `calibration-sequence`, `history-level`.

use super::GlobalArgs;
use anyhow::Result;
use nightfall_protocol::RunKind;
use nightfall_runner::{
    calibration_sequence, data_sequence, prepare_sequence, HistoryLedger, SequenceOutcome,
    StepTable,
};
use std::path::PathBuf;
use tracing::info;

pub fn run_data(global: &GlobalArgs, run: u32, calib_run: u32) -> Result<u8> {
    let (config, ctx) = super::setup(global)?;
    info!(run, calib_run, night = %ctx.night, "Data sequence");
    let outcome = data_sequence(&config, &ctx, run, calib_run)?;
    Ok(report(run, &outcome))
}

pub fn run_calibration(global: &GlobalArgs, run: u32) -> Result<u8> {
    let (config, ctx) = super::setup(global)?;
    info!(run, night = %ctx.night, "Calibration sequence");
    let outcome = calibration_sequence(&config, &ctx, run)?;
    Ok(report(run, &outcome))
}

pub fn history_level(
    global: &GlobalArgs,
    run: u32,
    kind: RunKind,
    file: Option<PathBuf>,
) -> Result<u8> {
    let (config, ctx) = super::setup(global)?;
    let history = match file {
        Some(path) => path,
        None => prepare_sequence(&config, &ctx, run, kind, None)
            .history_file(&config.paths.history_suffix),
    };
    let ledger = HistoryLedger::open(&history)?;
    let level = ledger.current_level(&format!("{:05}", run), &StepTable::for_kind(&config, kind));
    println!("{} {}", level.level, level.exit_code);
    Ok(0)
}

fn report(run: u32, outcome: &SequenceOutcome) -> u8 {
    match outcome {
        SequenceOutcome::Completed { steps_run } => {
            println!("Run {:05} completed ({} steps run)", run, steps_run);
        }
        SequenceOutcome::Failed {
            step,
            level,
            exit_code,
        } => {
            println!(
                "Run {:05} failed at {} (level {}, exit code {})",
                run, step, level, exit_code
            );
        }
    }
    exit_status(outcome.exit_code())
}

/// Clamp a step's exit code into a process exit status.
fn exit_status(code: i32) -> u8 {
    match u8::try_from(code) {
        Ok(status) => status,
        Err(_) => 1,
    }
}
