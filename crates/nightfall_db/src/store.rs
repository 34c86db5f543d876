//! Update-or-insert persistence of closing records.

use crate::backend::{quote_ident, BackendError, DbConnection, DbTransaction, DbValue};
use crate::records::{Assignments, TableRecord};
use tracing::{debug, info};

/// Column/value level database access used by the closer.
///
/// The closer never issues SQL; it hands over assignments and natural-key
/// conditions and gets back a row id.
pub trait RecordStore {
    /// UPDATE the row matching `conditions`; INSERT `conditions` plus
    /// `assignments` when none matched. Returns the row id.
    fn update_or_insert(
        &self,
        table: &str,
        assignments: &Assignments,
        conditions: &Assignments,
    ) -> Result<i64, BackendError>;

    /// Unconditional INSERT. Returns the new row id.
    fn insert(&self, table: &str, assignments: &Assignments) -> Result<i64, BackendError>;
}

/// Upsert a typed record by its natural key.
pub fn upsert_record<S, R>(store: &S, table: &str, record: &R) -> Result<i64, BackendError>
where
    S: RecordStore + ?Sized,
    R: TableRecord,
{
    store.update_or_insert(table, &record.assignments(), &record.natural_key())
}

/// Insert a typed record, key columns included.
pub fn insert_record<S, R>(store: &S, table: &str, record: &R) -> Result<i64, BackendError>
where
    S: RecordStore + ?Sized,
    R: TableRecord,
{
    store.insert(table, &record.natural_key().merged(&record.assignments()))
}

/// Table names of the three closing tables.
#[derive(Debug, Clone)]
pub struct TableNames {
    pub analysis: String,
    pub summary: String,
    pub files: String,
}

/// [`RecordStore`] over a DuckDB connection.
#[derive(Debug, Clone)]
pub struct DuckDbRecordStore {
    conn: DbConnection,
}

impl DuckDbRecordStore {
    /// Wrap `conn` and create the closing tables if missing.
    pub fn new(conn: DbConnection, tables: &TableNames) -> Result<Self, BackendError> {
        let store = Self { conn };
        store.ensure_schema(tables)?;
        Ok(store)
    }

    pub fn connection(&self) -> &DbConnection {
        &self.conn
    }

    fn ensure_schema(&self, tables: &TableNames) -> Result<(), BackendError> {
        let analysis = table_ident(&tables.analysis)?;
        let summary = table_ident(&tables.summary)?;
        let files = table_ident(&tables.files)?;
        let sql = format!(
            r#"
            CREATE SEQUENCE IF NOT EXISTS {analysis_seq};
            CREATE TABLE IF NOT EXISTS {analysis} (
                id BIGINT DEFAULT nextval('{analysis_seq_name}'),
                telescope VARCHAR NOT NULL,
                night VARCHAR NOT NULL,
                sequences BIGINT,
                concept_counts VARCHAR,
                comments VARCHAR,
                is_closed BOOLEAN,
                updated_at TIMESTAMP
            );
            CREATE SEQUENCE IF NOT EXISTS {summary_seq};
            CREATE TABLE IF NOT EXISTS {summary} (
                id BIGINT DEFAULT nextval('{summary_seq_name}'),
                telescope VARCHAR NOT NULL,
                night VARCHAR NOT NULL,
                activity VARCHAR NOT NULL,
                is_finished BOOLEAN,
                end_time TIMESTAMP
            );
            CREATE SEQUENCE IF NOT EXISTS {files_seq};
            CREATE TABLE IF NOT EXISTS {files} (
                id BIGINT DEFAULT nextval('{files_seq_name}'),
                telescope VARCHAR NOT NULL,
                night VARCHAR NOT NULL,
                run_id BIGINT NOT NULL,
                concept VARCHAR NOT NULL,
                file_name VARCHAR NOT NULL,
                destination VARCHAR NOT NULL,
                size_bytes BIGINT,
                checksum VARCHAR,
                registered_at TIMESTAMP
            );
            "#,
            analysis_seq = quote_ident(&seq_name(&tables.analysis)),
            analysis_seq_name = seq_name(&tables.analysis),
            summary_seq = quote_ident(&seq_name(&tables.summary)),
            summary_seq_name = seq_name(&tables.summary),
            files_seq = quote_ident(&seq_name(&tables.files)),
            files_seq_name = seq_name(&tables.files),
        );
        self.conn.execute_batch(&sql)?;
        debug!(
            analysis = %tables.analysis,
            summary = %tables.summary,
            files = %tables.files,
            "Closing tables ready"
        );
        Ok(())
    }
}

impl RecordStore for DuckDbRecordStore {
    fn update_or_insert(
        &self,
        table: &str,
        assignments: &Assignments,
        conditions: &Assignments,
    ) -> Result<i64, BackendError> {
        let table_sql = table_ident(table)?;
        self.conn.transaction(|tx| {
            if !conditions.is_empty() {
                let (where_sql, where_params) = where_clause(conditions);
                let select = format!(
                    "SELECT id FROM {} WHERE {} ORDER BY id LIMIT 1",
                    table_sql, where_sql
                );
                if let Some(row) = tx.query_optional(&select, &where_params)? {
                    let id: i64 = row.get(0)?;
                    if !assignments.is_empty() {
                        let set_sql = assignments
                            .columns()
                            .map(|c| format!("{} = ?", quote_ident(c)))
                            .collect::<Vec<_>>()
                            .join(", ");
                        let mut params: Vec<DbValue> = assignments.values().cloned().collect();
                        params.push(DbValue::Integer(id));
                        let update =
                            format!("UPDATE {} SET {} WHERE id = ?", table_sql, set_sql);
                        tx.execute(&update, &params)?;
                    }
                    info!(table, id, "Updated record");
                    return Ok(id);
                }
            }
            let id = insert_in(tx, &table_sql, &conditions.merged(assignments))?;
            info!(table, id, "Inserted record");
            Ok(id)
        })
    }

    fn insert(&self, table: &str, assignments: &Assignments) -> Result<i64, BackendError> {
        let table_sql = table_ident(table)?;
        let id = self
            .conn
            .transaction(|tx| insert_in(tx, &table_sql, assignments))?;
        debug!(table, id, "Inserted record");
        Ok(id)
    }
}

/// Logs every write and performs none.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimulatedRecordStore;

impl RecordStore for SimulatedRecordStore {
    fn update_or_insert(
        &self,
        table: &str,
        assignments: &Assignments,
        conditions: &Assignments,
    ) -> Result<i64, BackendError> {
        info!(
            "SIMULATE update-or-insert into {}: set {:?} where {:?}",
            table,
            assignments.columns().collect::<Vec<_>>(),
            conditions.columns().collect::<Vec<_>>()
        );
        Ok(0)
    }

    fn insert(&self, table: &str, assignments: &Assignments) -> Result<i64, BackendError> {
        info!(
            "SIMULATE insert into {}: {:?}",
            table,
            assignments.columns().collect::<Vec<_>>()
        );
        Ok(0)
    }
}

fn insert_in(
    tx: &mut DbTransaction<'_>,
    table_sql: &str,
    values: &Assignments,
) -> Result<i64, BackendError> {
    if values.is_empty() {
        return Err(BackendError::InvalidInput(format!(
            "Insert into {} without columns",
            table_sql
        )));
    }
    let columns = values
        .columns()
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = vec!["?"; values.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
        table_sql, columns, placeholders
    );
    let params: Vec<DbValue> = values.values().cloned().collect();
    tx.query_scalar(&sql, &params)
}

fn where_clause(conditions: &Assignments) -> (String, Vec<DbValue>) {
    let sql = conditions
        .columns()
        .map(|c| format!("{} = ?", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    (sql, conditions.values().cloned().collect())
}

fn seq_name(table: &str) -> String {
    format!("{}_id_seq", table)
}

/// Table names come from configuration; only plain identifiers are accepted.
fn table_ident(table: &str) -> Result<String, BackendError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if !valid {
        return Err(BackendError::InvalidInput(format!(
            "Invalid table name: '{}'",
            table
        )));
    }
    Ok(quote_ident(table))
}
