//! Resumable processing of a single run.
//!
//! A run's progress lives only in its history file. [`HistoryLedger`]
//! replays it into a [`ProcessingLevel`], [`SequenceStateMachine`] resumes
//! from that level and [`RunStepExecutor`] appends the outcome of every
//! step it launches.

pub mod error;
pub mod executor;
pub mod ledger;
pub mod machine;
pub mod sequence;
pub mod steps;

pub use error::{HistoryParseError, Result, RunnerError};
pub use executor::{RunStepExecutor, StepOutcome, LAUNCH_FAILURE_EXIT_CODE};
pub use ledger::{HistoryEntry, HistoryLedger, ProcessingLevel};
pub use machine::{SequenceOutcome, SequenceStateMachine};
pub use sequence::{
    calibration_sequence, data_sequence, prepare_sequence, run_sequence, sequence_level,
};
pub use steps::{PlannedStep, StepCommand, StepTable};
