use nightfall_db::BackendError;
use nightfall_protocol::ProtocolError;
use nightfall_runner::RunnerError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CloseError>;

#[derive(Debug, Error)]
pub enum CloseError {
    #[error("Night {night} already closed for {telescope} ({lock})")]
    AlreadyClosed {
        night: String,
        telescope: String,
        lock: PathBuf,
    },

    #[error("Night summary {0} expected but it does not exist; use --reason to close without data")]
    MissingNightSummary(PathBuf),

    #[error("Closing declined by the operator, night {night} for {telescope} remains open")]
    UserAbort { night: String, telescope: String },

    #[error("Unexpected closer state: {0}")]
    UnexpectedState(String),

    #[error("Closing record not persisted: {0}")]
    Persistence(#[from] BackendError),

    #[error("Reconciliation incomplete, failed concepts: {}", .0.join(", "))]
    Reconcile(Vec<String>),

    #[error("Cannot write night lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Invalid concept pattern for {concept}: {message}")]
    Pattern { concept: String, message: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CloseError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CloseError::AlreadyClosed { .. } => 1,
            CloseError::MissingNightSummary(_) => 2,
            CloseError::UserAbort { .. } => 3,
            CloseError::Persistence(_) => 4,
            CloseError::UnexpectedState(_) => 9,
            _ => 1,
        }
    }

    /// The night was left untouched on purpose (already closed, or the
    /// operator said no).
    pub fn is_abort(&self) -> bool {
        matches!(
            self,
            CloseError::AlreadyClosed { .. } | CloseError::UserAbort { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        let abort = CloseError::UserAbort {
            night: "2020_01_17".into(),
            telescope: "LST1".into(),
        };
        assert_eq!(abort.exit_code(), 3);
        assert!(abort.is_abort());
        assert_eq!(CloseError::MissingNightSummary("x".into()).exit_code(), 2);
        assert_eq!(CloseError::UnexpectedState("x".into()).exit_code(), 9);
        assert_eq!(CloseError::Reconcile(vec!["DL2".into()]).exit_code(), 1);
        assert!(!CloseError::Reconcile(vec![]).is_abort());
    }
}
