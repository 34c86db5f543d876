//! DuckDB connection wrapper.
//!
//! Synchronous, single connection per process. File databases hold the
//! exclusive writer lock for as long as the connection lives.

use crate::lock::{try_lock_exclusive, DbLockGuard, LockError};
use chrono::{DateTime, Utc};
use duckdb::types::{TimeUnit, Value, ValueRef};
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug_span, info};

/// Errors from database backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Database is locked by another process: {0}")]
    Locked(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Type conversion error: {0}")]
    TypeConversion(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),
}

/// UTC instant stored in TIMESTAMP columns, microsecond precision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTimestamp(DateTime<Utc>);

impl DbTimestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    fn micros(&self) -> i64 {
        self.0.timestamp_micros()
    }
}

impl From<DateTime<Utc>> for DbTimestamp {
    fn from(at: DateTime<Utc>) -> Self {
        Self(at)
    }
}

/// A parameter or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum DbValue {
    Null,
    Integer(i64),
    Text(String),
    Boolean(bool),
    Timestamp(DbTimestamp),
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        DbValue::Integer(v)
    }
}

impl From<u32> for DbValue {
    fn from(v: u32) -> Self {
        DbValue::Integer(i64::from(v))
    }
}

impl From<u64> for DbValue {
    fn from(v: u64) -> Self {
        DbValue::Integer(i64::try_from(v).unwrap_or(i64::MAX))
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Boolean(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::Text(v.to_string())
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::Text(v)
    }
}

impl From<DbTimestamp> for DbValue {
    fn from(v: DbTimestamp) -> Self {
        DbValue::Timestamp(v)
    }
}

impl DbValue {
    fn to_duckdb(&self) -> Value {
        match self {
            DbValue::Null => Value::Null,
            DbValue::Integer(v) => Value::BigInt(*v),
            DbValue::Text(v) => Value::Text(v.clone()),
            DbValue::Boolean(v) => Value::Boolean(*v),
            DbValue::Timestamp(v) => Value::Timestamp(TimeUnit::Microsecond, v.micros()),
        }
    }

    fn from_duckdb(cell: ValueRef<'_>) -> Result<Self, BackendError> {
        Ok(match cell {
            ValueRef::Null => DbValue::Null,
            ValueRef::Boolean(v) => DbValue::Boolean(v),
            ValueRef::TinyInt(v) => DbValue::Integer(i64::from(v)),
            ValueRef::SmallInt(v) => DbValue::Integer(i64::from(v)),
            ValueRef::Int(v) => DbValue::Integer(i64::from(v)),
            ValueRef::BigInt(v) => DbValue::Integer(v),
            ValueRef::UInt(v) => DbValue::Integer(i64::from(v)),
            ValueRef::Text(v) => DbValue::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Timestamp(unit, v) => {
                let micros = match unit {
                    TimeUnit::Second => v * 1_000_000,
                    TimeUnit::Millisecond => v * 1_000,
                    TimeUnit::Microsecond => v,
                    TimeUnit::Nanosecond => v / 1_000,
                };
                let at = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
                    BackendError::TypeConversion(format!("Timestamp out of range: {}", micros))
                })?;
                DbValue::Timestamp(DbTimestamp(at))
            }
            other => {
                return Err(BackendError::TypeConversion(format!(
                    "Unsupported column value {:?}",
                    other
                )))
            }
        })
    }
}

/// One result row.
#[derive(Debug, Clone)]
pub struct DbRow(Vec<DbValue>);

impl DbRow {
    pub fn get<T: FromDbValue>(&self, index: usize) -> Result<T, BackendError> {
        let cell = self.0.get(index).ok_or_else(|| {
            BackendError::TypeConversion(format!("Column index {} out of bounds", index))
        })?;
        T::from_db_value(cell)
    }
}

/// Conversion out of a result cell.
pub trait FromDbValue: Sized {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError>;
}

fn unexpected(expected: &str, value: &DbValue) -> BackendError {
    BackendError::TypeConversion(format!("Expected {}, found {:?}", expected, value))
}

impl FromDbValue for i64 {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Integer(v) => Ok(*v),
            other => Err(unexpected("integer", other)),
        }
    }
}

impl FromDbValue for String {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Text(v) => Ok(v.clone()),
            other => Err(unexpected("text", other)),
        }
    }
}

impl FromDbValue for bool {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Boolean(v) => Ok(*v),
            other => Err(unexpected("boolean", other)),
        }
    }
}

impl FromDbValue for DbTimestamp {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Timestamp(v) => Ok(v.clone()),
            other => Err(unexpected("timestamp", other)),
        }
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    fn from_db_value(value: &DbValue) -> Result<Self, BackendError> {
        match value {
            DbValue::Null => Ok(None),
            _ => T::from_db_value(value).map(Some),
        }
    }
}

/// DuckDB connection, optionally holding the single-writer lock.
#[derive(Clone)]
pub struct DbConnection {
    conn: Rc<duckdb::Connection>,
    /// Dropping the last clone releases the writer lock.
    lock_guard: Option<Rc<DbLockGuard>>,
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConnection")
            .field("locked", &self.lock_guard.is_some())
            .finish()
    }
}

impl DbConnection {
    /// Open (or create) a DuckDB file with the exclusive writer lock.
    pub fn open_duckdb(path: &Path) -> Result<Self, BackendError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                BackendError::Database(format!(
                    "Cannot create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let guard = try_lock_exclusive(path).map_err(|e| match e {
            LockError::Locked(p) => BackendError::Locked(p.display().to_string()),
            other => BackendError::Database(other.to_string()),
        })?;
        let conn = duckdb::Connection::open(path)?;
        info!(path = %path.display(), "Opened closing database");

        Ok(Self {
            conn: Rc::new(conn),
            lock_guard: Some(Rc::new(guard)),
        })
    }

    /// In-memory database, no lock.
    pub fn open_duckdb_memory() -> Result<Self, BackendError> {
        Ok(Self {
            conn: Rc::new(duckdb::Connection::open_in_memory()?),
            lock_guard: None,
        })
    }

    pub fn execute(&self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
        execute_on(&self.conn, sql, params)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), BackendError> {
        let _span = debug_span!("db.batch").entered();
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// First row of `sql`; an empty result is an error.
    pub fn query_row(&self, sql: &str, params: &[DbValue]) -> Result<DbRow, BackendError> {
        first_row_on(&self.conn, sql, params)?.ok_or_else(|| no_row(sql))
    }

    pub fn query_scalar<T: FromDbValue>(
        &self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, BackendError> {
        self.query_row(sql, params)?.get(0)
    }

    /// Run `op` inside BEGIN/COMMIT, rolling back on error.
    pub fn transaction<T, F>(&self, op: F) -> Result<T, BackendError>
    where
        F: FnOnce(&mut DbTransaction<'_>) -> Result<T, BackendError>,
    {
        self.conn.execute_batch("BEGIN")?;
        let result = op(&mut DbTransaction { conn: &self.conn });
        match result {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(err) => match self.conn.execute_batch("ROLLBACK") {
                Ok(()) => Err(err),
                Err(rollback) => Err(BackendError::Transaction(format!(
                    "{}; rollback failed: {}",
                    err, rollback
                ))),
            },
        }
    }
}

/// Statements issued inside [`DbConnection::transaction`].
pub struct DbTransaction<'a> {
    conn: &'a duckdb::Connection,
}

impl DbTransaction<'_> {
    pub fn execute(&mut self, sql: &str, params: &[DbValue]) -> Result<u64, BackendError> {
        execute_on(self.conn, sql, params)
    }

    pub fn query_optional(
        &mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<Option<DbRow>, BackendError> {
        first_row_on(self.conn, sql, params)
    }

    pub fn query_scalar<T: FromDbValue>(
        &mut self,
        sql: &str,
        params: &[DbValue],
    ) -> Result<T, BackendError> {
        self.query_optional(sql, params)?
            .ok_or_else(|| no_row(sql))?
            .get(0)
    }
}

fn execute_on(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[DbValue],
) -> Result<u64, BackendError> {
    let _span = debug_span!("db.exec", op = statement_kind(sql)).entered();
    let values: Vec<Value> = params.iter().map(DbValue::to_duckdb).collect();
    let changed = conn
        .prepare(sql)?
        .execute(duckdb::params_from_iter(values))?;
    Ok(changed as u64)
}

fn first_row_on(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[DbValue],
) -> Result<Option<DbRow>, BackendError> {
    let _span = debug_span!("db.query", op = statement_kind(sql)).entered();
    let values: Vec<Value> = params.iter().map(DbValue::to_duckdb).collect();
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(duckdb::params_from_iter(values))?;
    let width = rows.as_ref().map_or(0, |s| s.column_count());
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let cells = (0..width)
        .map(|i| DbValue::from_duckdb(row.get_ref(i)?))
        .collect::<Result<Vec<_>, BackendError>>()?;
    Ok(Some(DbRow(cells)))
}

fn no_row(sql: &str) -> BackendError {
    BackendError::Database(format!("{} returned no row", statement_kind(sql)))
}

fn statement_kind(sql: &str) -> &str {
    sql.split_whitespace().next().unwrap_or("")
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn query_scalar_reads_back_inserted_row() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id BIGINT, name TEXT)")
            .unwrap();
        conn.execute(
            "INSERT INTO t VALUES (?, ?)",
            &[DbValue::from(7_i64), DbValue::from("LST1")],
        )
        .unwrap();

        let name: String = conn
            .query_scalar("SELECT name FROM t WHERE id = ?", &[DbValue::from(7_i64)])
            .unwrap();
        assert_eq!(name, "LST1");
    }

    #[test]
    fn empty_result_is_an_error() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id BIGINT)").unwrap();

        let err = conn.query_scalar::<i64>("SELECT id FROM t", &[]).unwrap_err();
        assert!(err.to_string().contains("SELECT returned no row"));
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id BIGINT)").unwrap();

        let result: Result<(), BackendError> = conn.transaction(|tx| {
            tx.execute("INSERT INTO t VALUES (?)", &[DbValue::from(1_i64)])?;
            Err(BackendError::InvalidInput("abort".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = conn.query_scalar("SELECT COUNT(*) FROM t", &[]).unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn timestamps_keep_microseconds() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (\"at\" TIMESTAMP)").unwrap();
        let end = Utc.with_ymd_and_hms(2020, 1, 18, 7, 30, 0).unwrap()
            + chrono::Duration::microseconds(250);
        let ts = DbTimestamp::from(end);
        conn.execute("INSERT INTO t VALUES (?)", &[DbValue::from(ts.clone())])
            .unwrap();

        let back: DbTimestamp = conn.query_scalar("SELECT \"at\" FROM t", &[]).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn null_reads_as_none() {
        let conn = DbConnection::open_duckdb_memory().unwrap();
        let comment: Option<String> = conn.query_scalar("SELECT NULL::VARCHAR", &[]).unwrap();
        assert_eq!(comment, None);
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("night_summary"), "\"night_summary\"");
        assert_eq!(quote_ident("a\"b"), "\"a\"\"b\"");
    }
}
