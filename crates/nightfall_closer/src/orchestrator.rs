//! The night closing state machine.
//!
//! ```text
//! CHECK_LOCK -> DETERMINE_SOURCE -> [CONFIRM] -> RECONCILE -> PERSIST -> LOCK -> SYNC
//! ```
//!
//! CONFIRM is only visited when the night summary shows unfinished
//! sequences. A single-sequence close stops after PERSIST.

use crate::error::{CloseError, Result};
use crate::night_lock::{LockCreateError, NightLock};
use crate::persist::persist_closing;
use crate::prompt::Operator;
use crate::reconcile::{FileReconciler, ReconcileReport};
use crate::remote::RemoteSync;
use crate::report::ClosingReport;
use crate::summary::{is_finished_check, FinishedCheck};
use nightfall_db::{RecordStore, SimulatedRecordStore};
use nightfall_protocol::{NightContext, NightPaths, NightfallConfig, Sequence};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosingState {
    CheckLock,
    DetermineSource,
    Confirm,
    Reconcile,
    Persist,
    Lock,
    Sync,
}

impl fmt::Display for ClosingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ClosingState::CheckLock => "CHECK_LOCK",
            ClosingState::DetermineSource => "DETERMINE_SOURCE",
            ClosingState::Confirm => "CONFIRM",
            ClosingState::Reconcile => "RECONCILE",
            ClosingState::Persist => "PERSIST",
            ClosingState::Lock => "LOCK",
            ClosingState::Sync => "SYNC",
        };
        f.write_str(name)
    }
}

/// Where the night's sequence list comes from.
#[derive(Debug)]
enum Source {
    NoData { reason: Option<String> },
    NightSummary(FinishedCheck),
}

/// A close that went through. Declined or already closed nights are
/// [`CloseError::UserAbort`] and [`CloseError::AlreadyClosed`].
#[derive(Debug)]
pub enum CloseOutcome {
    Closed {
        lock: PathBuf,
        /// False in simulate mode.
        lock_created: bool,
        report: ClosingReport,
        reconciled: ReconcileReport,
    },
    Partial {
        sequence: String,
        report: ClosingReport,
        reconciled: ReconcileReport,
    },
}

impl CloseOutcome {
    pub fn reconciled(&self) -> &ReconcileReport {
        match self {
            CloseOutcome::Closed { reconciled, .. } | CloseOutcome::Partial { reconciled, .. } => {
                reconciled
            }
        }
    }

    pub fn report(&self) -> &ClosingReport {
        match self {
            CloseOutcome::Closed { report, .. } | CloseOutcome::Partial { report, .. } => report,
        }
    }
}

pub struct ClosingOrchestrator<'a> {
    config: &'a NightfallConfig,
    ctx: &'a NightContext,
    store: &'a dyn RecordStore,
    operator: &'a mut dyn Operator,
    remote: &'a dyn RemoteSync,
    state: ClosingState,
}

impl<'a> ClosingOrchestrator<'a> {
    pub fn new(
        config: &'a NightfallConfig,
        ctx: &'a NightContext,
        store: &'a dyn RecordStore,
        operator: &'a mut dyn Operator,
        remote: &'a dyn RemoteSync,
    ) -> Self {
        Self {
            config,
            ctx,
            store,
            operator,
            remote,
            state: ClosingState::CheckLock,
        }
    }

    pub fn state(&self) -> ClosingState {
        self.state
    }

    fn enter(&mut self, state: ClosingState) {
        debug!(from = %self.state, to = %state, "Closer transition");
        self.state = state;
    }

    pub fn run(&mut self) -> Result<CloseOutcome> {
        let config = self.config;
        let ctx = self.ctx;
        let paths = NightPaths::new(config, ctx);
        let simulated = SimulatedRecordStore;
        let store: &dyn RecordStore = if ctx.simulate { &simulated } else { self.store };
        info!(
            telescope = %ctx.telescope,
            night = %ctx.night,
            simulate = ctx.simulate,
            sequence = ?ctx.sequence_to_close,
            "Closing night"
        );

        // CHECK_LOCK
        let lock = NightLock::for_night(&paths);
        if lock.is_day_closed() {
            warn!(lock = %lock.path().display(), "Night already closed");
            return Err(self.already_closed(&lock));
        }

        self.enter(ClosingState::DetermineSource);
        let source = self.determine_source()?;

        let (sequences, reason) = match source {
            Source::NoData { reason } => (Vec::new(), reason),
            Source::NightSummary(check) => {
                if !check.success() {
                    self.enter(ClosingState::Confirm);
                    self.confirm(&check)?;
                }
                (check.sequences, None)
            }
        };
        self.check_filter(&sequences);

        self.enter(ClosingState::Reconcile);
        let report = ClosingReport::collect(&paths, ctx, &sequences)?;
        let reconciled = FileReconciler::new(&paths, ctx, store)?.reconcile(&sequences)?;
        for conflict in reconciled.conflicts() {
            warn!(
                staged = %conflict.staged.display(),
                destination = %conflict.destination.display(),
                "Unresolved conflict"
            );
        }
        if !reconciled.failed_concepts.is_empty() {
            return Err(CloseError::Reconcile(
                reconciled
                    .failed_concepts
                    .iter()
                    .map(|(concept, _)| concept.clone())
                    .collect(),
            ));
        }

        self.enter(ClosingState::Persist);
        persist_closing(store, &paths, ctx, &report, reason.as_deref())?;

        if let Some(sequence) = &ctx.sequence_to_close {
            info!(sequence = %sequence, "Single sequence closed, night lock not written");
            return Ok(CloseOutcome::Partial {
                sequence: sequence.clone(),
                report,
                reconciled,
            });
        }

        self.enter(ClosingState::Lock);
        if ctx.simulate {
            info!("SIMULATE create night lock {}", lock.path().display());
            return Ok(CloseOutcome::Closed {
                lock: lock.path().to_path_buf(),
                lock_created: false,
                report,
                reconciled,
            });
        }
        match lock.create(&report.to_lock_text()) {
            Ok(()) => {}
            Err(LockCreateError::AlreadyExists) => return Err(self.already_closed(&lock)),
            Err(LockCreateError::Io(source)) => {
                return Err(CloseError::Lock {
                    path: lock.path().to_path_buf(),
                    source,
                })
            }
        }

        self.enter(ClosingState::Sync);
        if let Err(e) = self.remote.sync(lock.path(), ctx) {
            warn!("Night lock not synchronized: {}", e);
        }

        info!(telescope = %ctx.telescope, night = %ctx.night, "Night closed");
        Ok(CloseOutcome::Closed {
            lock: lock.path().to_path_buf(),
            lock_created: true,
            report,
            reconciled,
        })
    }

    fn determine_source(&mut self) -> Result<Source> {
        let ctx = self.ctx;
        match ctx.reason.as_deref().map(str::trim) {
            Some(reason) if !reason.is_empty() => {
                info!(reason, "Closing without data");
                Ok(Source::NoData {
                    reason: Some(reason.to_string()),
                })
            }
            Some(_) => {
                warn!("No data and no reason given for this night");
                let reason = if ctx.non_interactive {
                    None
                } else {
                    self.operator
                        .ask_reason()
                        .map_err(|e| CloseError::io("<operator>", e))?
                };
                Ok(Source::NoData { reason })
            }
            None if ctx.use_night_summary => {
                let check = is_finished_check(self.config, ctx)?;
                info!(
                    sequences = check.sequences.len(),
                    finished = check.success(),
                    "Night summary evaluated"
                );
                Ok(Source::NightSummary(check))
            }
            None => Err(CloseError::UnexpectedState(
                "neither a reason nor the night summary selects the night's data".to_string(),
            )),
        }
    }

    fn confirm(&mut self, check: &FinishedCheck) -> Result<()> {
        for (seq, level) in check.pending() {
            warn!(job = %seq.job_name(), %level, "Sequence not finished");
        }
        if self.ctx.non_interactive {
            info!("Non-interactive mode, closing with unfinished sequences");
            return Ok(());
        }
        let yes = self
            .operator
            .confirm("Not every sequence finished. Close that day? (y/n): ")
            .map_err(|e| CloseError::io("<operator>", e))?;
        if yes {
            Ok(())
        } else {
            info!("Operator declined, night left open");
            Err(CloseError::UserAbort {
                night: self.ctx.night.to_string(),
                telescope: self.ctx.telescope.clone(),
            })
        }
    }

    fn check_filter(&self, sequences: &[Sequence]) {
        let Some(wanted) = &self.ctx.sequence_to_close else {
            return;
        };
        let known = sequences
            .iter()
            .any(|s| s.run_str().contains(wanted.trim()) || wanted.contains(&s.run_str()));
        if !known {
            warn!(sequence = %wanted, "Requested sequence is not in the night summary");
        }
    }

    fn already_closed(&self, lock: &NightLock) -> CloseError {
        CloseError::AlreadyClosed {
            night: self.ctx.night.to_string(),
            telescope: self.ctx.telescope.clone(),
            lock: lock.path().to_path_buf(),
        }
    }
}
