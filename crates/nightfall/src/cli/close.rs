//! `nightfall close`

use super::GlobalArgs;
use anyhow::{Context, Result};
use nightfall_closer::{
    AutoConfirm, CloseOutcome, ClosingOrchestrator, NoRemoteSync, Operator, ReconcileAction,
    RemoteSync, ScpSync, TerminalPrompt,
};
use nightfall_db::{DbConnection, DuckDbRecordStore, RecordStore, SimulatedRecordStore, TableNames};
use nightfall_protocol::NightfallConfig;

#[derive(Debug, Clone, Default)]
pub struct CloseArgs {
    pub sequence: Option<String>,
    pub reason: Option<String>,
    pub non_interactive: bool,
    pub no_night_summary: bool,
}

pub fn run(global: &GlobalArgs, args: CloseArgs) -> Result<u8> {
    let (config, mut ctx) = super::setup(global)?;
    ctx.sequence_to_close = args.sequence;
    ctx.reason = args.reason;
    ctx.non_interactive = args.non_interactive;
    ctx.use_night_summary = !args.no_night_summary;

    let store = open_store(&config, ctx.simulate)?;
    let remote: Box<dyn RemoteSync> = if config.remote.enabled {
        Box::new(ScpSync::new(config.remote.clone()))
    } else {
        Box::new(NoRemoteSync)
    };
    let mut operator: Box<dyn Operator> = if ctx.non_interactive {
        Box::new(AutoConfirm)
    } else {
        Box::new(TerminalPrompt::stdio())
    };

    let outcome = ClosingOrchestrator::new(
        &config,
        &ctx,
        store.as_ref(),
        operator.as_mut(),
        remote.as_ref(),
    )
    .run()?;

    print_outcome(&outcome);
    Ok(0)
}

/// The database is not touched at all in simulate mode.
fn open_store(config: &NightfallConfig, simulate: bool) -> Result<Box<dyn RecordStore>> {
    if simulate {
        return Ok(Box::new(SimulatedRecordStore));
    }
    let db = &config.database;
    let conn = DbConnection::open_duckdb(&db.path)
        .with_context(|| format!("Failed to open database {}", db.path.display()))?;
    let tables = TableNames {
        analysis: db.analysis_table.clone(),
        summary: db.summary_table.clone(),
        files: db.files_table.clone(),
    };
    Ok(Box::new(DuckDbRecordStore::new(conn, &tables)?))
}

fn print_outcome(outcome: &CloseOutcome) {
    let reconciled = outcome.reconciled();
    let report = outcome.report();
    match outcome {
        CloseOutcome::Closed {
            lock, lock_created, ..
        } => {
            if *lock_created {
                println!("Night {} closed for {}", report.night, report.telescope);
                println!("Lock: {}", lock.display());
            } else {
                println!("Night {} would be closed for {}", report.night, report.telescope);
            }
        }
        CloseOutcome::Partial { sequence, .. } => {
            println!("Sequence {} of night {} closed", sequence, report.night);
        }
    }
    println!(
        "Files: {} moved, {} copied, {} removed, {} conflicts, {} unowned",
        reconciled.count(ReconcileAction::Moved),
        reconciled.count(ReconcileAction::Copied),
        reconciled.count(ReconcileAction::LinkRemoved)
            + reconciled.count(ReconcileAction::DuplicateRemoved),
        reconciled.count(ReconcileAction::Conflict),
        reconciled.count(ReconcileAction::Unowned),
    );
    for conflict in reconciled.conflicts() {
        println!(
            "  CONFLICT {} differs from {}",
            conflict.staged.display(),
            conflict.destination.display()
        );
    }
}
