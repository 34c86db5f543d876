//! Per-run processing entry points.

use crate::error::Result;
use crate::executor::RunStepExecutor;
use crate::ledger::{HistoryLedger, ProcessingLevel};
use crate::machine::{SequenceOutcome, SequenceStateMachine};
use crate::steps::StepTable;
use nightfall_protocol::{NightContext, NightPaths, NightfallConfig, RunKind, Sequence};
use tracing::info;

/// Build the sequence record for one run of the context's night.
///
/// Artifacts are resolved against `parent_run` for data runs.
pub fn prepare_sequence(
    config: &NightfallConfig,
    ctx: &NightContext,
    run_id: u32,
    kind: RunKind,
    parent_run: Option<u32>,
) -> Sequence {
    let paths = NightPaths::new(config, ctx);
    let mut seq = Sequence::new(0, &ctx.telescope, run_id, kind, 0, paths.analysis_dir());
    seq.parent_run = parent_run;
    seq.artifacts = paths.calibration_artifacts(seq.calibration_run());
    seq
}

/// Level of `seq` read from its history file.
pub fn sequence_level(config: &NightfallConfig, seq: &Sequence) -> Result<ProcessingLevel> {
    let ledger = HistoryLedger::open(seq.history_file(&config.paths.history_suffix))?;
    let table = StepTable::for_kind(config, seq.run_kind);
    Ok(ledger.current_level(&seq.run_str(), &table))
}

/// Drive `seq` through its step table, resuming from its ledger.
pub fn run_sequence(
    config: &NightfallConfig,
    ctx: &NightContext,
    seq: &Sequence,
) -> Result<SequenceOutcome> {
    let paths = NightPaths::new(config, ctx);
    let ledger = HistoryLedger::open(seq.history_file(&config.paths.history_suffix))?;
    let executor = RunStepExecutor::new(seq.run_str(), ledger).with_working_dir(&seq.staging_dir);
    let table = StepTable::for_kind(config, seq.run_kind);
    let mut machine = SequenceStateMachine::new(table, executor, paths.sequence_vars(seq))
        .simulate(ctx.simulate);

    let outcome = machine.run()?;
    info!(job = %seq.job_name(), ?outcome, "Sequence run ended");
    Ok(outcome)
}

/// Reduce one data run using the calibration products of `calibration_run`.
pub fn data_sequence(
    config: &NightfallConfig,
    ctx: &NightContext,
    run_id: u32,
    calibration_run: u32,
) -> Result<SequenceOutcome> {
    let seq = prepare_sequence(config, ctx, run_id, RunKind::Data, Some(calibration_run));
    run_sequence(config, ctx, &seq)
}

/// Produce the pedestal and calibration products of one calibration run.
pub fn calibration_sequence(
    config: &NightfallConfig,
    ctx: &NightContext,
    run_id: u32,
) -> Result<SequenceOutcome> {
    let seq = prepare_sequence(config, ctx, run_id, RunKind::Pedcalib, None);
    run_sequence(config, ctx, &seq)
}
