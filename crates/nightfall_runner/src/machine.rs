//! Drives one sequence through its step table.
//!
//! The state is the processing level: `N` (nothing done) down to `0`
//! (finished), plus an absorbing failed state. Each invocation starts from
//! the level recomputed from the ledger, so completed steps never run twice.

use crate::error::{Result, RunnerError};
use crate::executor::{RunStepExecutor, StepOutcome};
use crate::ledger::ProcessingLevel;
use crate::steps::StepTable;
use nightfall_protocol::TemplateVars;
use tracing::{info, warn};

/// How a sequence run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Level 0 reached. `steps_run` counts steps executed by this invocation.
    Completed { steps_run: usize },
    /// A step ran and exited non-zero; nothing after it was attempted.
    Failed {
        step: String,
        level: usize,
        exit_code: i32,
    },
}

impl SequenceOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SequenceOutcome::Completed { .. })
    }

    /// Process exit code for the per-run commands.
    pub fn exit_code(&self) -> i32 {
        match self {
            SequenceOutcome::Completed { .. } => 0,
            SequenceOutcome::Failed { exit_code, .. } => *exit_code,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Level(usize),
    Done,
}

pub struct SequenceStateMachine {
    table: StepTable,
    executor: RunStepExecutor,
    vars: TemplateVars,
    simulate: bool,
}

impl SequenceStateMachine {
    pub fn new(table: StepTable, executor: RunStepExecutor, vars: TemplateVars) -> Self {
        Self {
            table,
            executor,
            vars,
            simulate: false,
        }
    }

    /// Every transition succeeds without running anything or touching the ledger.
    pub fn simulate(mut self, simulate: bool) -> Self {
        self.simulate = simulate;
        self
    }

    pub fn table(&self) -> &StepTable {
        &self.table
    }

    pub fn executor(&self) -> &RunStepExecutor {
        &self.executor
    }

    /// Current level. In simulation nothing counts as done.
    pub fn level(&self) -> ProcessingLevel {
        if self.simulate {
            return ProcessingLevel {
                level: self.table.len(),
                exit_code: 0,
            };
        }
        self.executor
            .ledger()
            .current_level(self.executor.run_id(), &self.table)
    }

    /// Run from the current level until done or a step fails.
    ///
    /// A launch failure is returned as [`RunnerError::Launch`]; it is
    /// recorded in the ledger like any other outcome first.
    pub fn run(&mut self) -> Result<SequenceOutcome> {
        if self.table.is_empty() {
            return Err(RunnerError::EmptyStepTable(self.table.kind().to_string()));
        }

        let start = self.level();
        info!(
            run_id = %self.executor.run_id(),
            kind = %self.table.kind(),
            level = start.level,
            "Going to level {}",
            start.level
        );

        let mut steps_run = 0;
        let mut state = State::Level(start.level);
        loop {
            let level = match state {
                State::Done | State::Level(0) => {
                    info!(
                        run_id = %self.executor.run_id(),
                        "Sequence finished without fatal errors"
                    );
                    return Ok(SequenceOutcome::Completed { steps_run });
                }
                State::Level(level) => level,
            };

            let Some(step) = self.table.step_at_level(level) else {
                state = State::Done;
                continue;
            };

            if self.simulate {
                info!(step = step.name(), level, "SIMULATE {}", step.name());
                state = State::Level(level - 1);
                continue;
            }

            let cmd = step.render(&self.vars)?;
            let outcome = self.executor.execute(&cmd)?;
            steps_run += 1;
            match outcome {
                StepOutcome::Exited(0) => {
                    state = State::Level(level - 1);
                    info!(run_id = %self.executor.run_id(), "Going to level {}", level - 1);
                }
                StepOutcome::Exited(exit_code) => {
                    warn!(
                        run_id = %self.executor.run_id(),
                        step = %cmd.step,
                        exit_code,
                        "Sequence halted at level {}",
                        level
                    );
                    return Ok(SequenceOutcome::Failed {
                        step: cmd.step,
                        level,
                        exit_code,
                    });
                }
                StepOutcome::LaunchFailed { reason } => {
                    return Err(RunnerError::Launch {
                        step: cmd.step,
                        program: cmd.program,
                        reason,
                    });
                }
            }
        }
    }
}
