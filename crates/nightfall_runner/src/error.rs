use nightfall_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RunnerError>;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// The history file could not be read or appended to.
    #[error("History file {path}: {source}")]
    Ledger {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The step's executable could not be found or spawned.
    #[error("Cannot launch step {step} ({program}): {reason}")]
    Launch {
        step: String,
        program: String,
        reason: String,
    },

    #[error(transparent)]
    Template(#[from] ProtocolError),

    #[error("Step table for {0} is empty")]
    EmptyStepTable(String),
}

/// A history line that does not have the seven-field layout.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Malformed history line: {reason}")]
pub struct HistoryParseError {
    pub reason: String,
}

impl HistoryParseError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
