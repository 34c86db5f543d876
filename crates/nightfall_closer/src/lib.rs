//! Closing an observing night.
//!
//! [`ClosingOrchestrator`] checks the [`NightLock`], works out which
//! sequences the night had and whether they finished, promotes their
//! products with [`FileReconciler`], persists the closing records and
//! finally writes the lock.

pub mod error;
pub mod night_lock;
pub mod orchestrator;
pub mod persist;
pub mod prompt;
pub mod reconcile;
pub mod remote;
pub mod report;
pub mod summary;

pub use error::{CloseError, Result};
pub use night_lock::{LockCreateError, NightLock};
pub use orchestrator::{CloseOutcome, ClosingOrchestrator, ClosingState};
pub use persist::{persist_closing, PersistedIds};
pub use prompt::{AutoConfirm, Operator, TerminalPrompt};
pub use reconcile::{FileDecision, FileReconciler, ReconcileAction, ReconcileReport};
pub use remote::{NoRemoteSync, RemoteSync, RemoteSyncError, ScpSync};
pub use report::ClosingReport;
pub use summary::{is_finished_check, parse_night_summary, FinishedCheck};
