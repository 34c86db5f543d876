//! Persistence of night-closing records.
//!
//! ```rust,ignore
//! use nightfall_db::{DbConnection, DuckDbRecordStore, TableNames, upsert_record};
//!
//! let conn = DbConnection::open_duckdb(&config.database.path)?;
//! let store = DuckDbRecordStore::new(conn, &tables)?;
//! upsert_record(&store, &tables.summary, &summary_record)?;
//! ```

pub mod backend;
pub mod lock;
pub mod records;
pub mod store;

pub use backend::{BackendError, DbConnection, DbRow, DbTimestamp, DbValue, FromDbValue};
pub use lock::{lock_path_for, try_lock_exclusive, DbLockGuard, LockError};
pub use records::{
    Assignments, NightAnalysisRecord, NightSummaryRecord, RunFileRecord, TableRecord,
};
pub use store::{
    insert_record, upsert_record, DuckDbRecordStore, RecordStore, SimulatedRecordStore,
    TableNames,
};
