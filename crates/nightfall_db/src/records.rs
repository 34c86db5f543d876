//! Typed rows for the closing tables.
//!
//! Records are plain structs; they turn into column/value pairs only at the
//! [`crate::RecordStore`] boundary.

use crate::backend::{DbTimestamp, DbValue};
use std::collections::BTreeMap;

/// Ordered column/value pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assignments {
    pairs: Vec<(String, DbValue)>,
}

impl Assignments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `column`, replacing an earlier value for the same column.
    pub fn set(mut self, column: &str, value: impl Into<DbValue>) -> Self {
        let value = value.into();
        match self.pairs.iter_mut().find(|(c, _)| c == column) {
            Some(slot) => slot.1 = value,
            None => self.pairs.push((column.to_string(), value)),
        }
        self
    }

    /// Set `column` only when `value` is present.
    pub fn set_opt<T: Into<DbValue>>(self, column: &str, value: Option<T>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    pub fn get(&self, column: &str) -> Option<&DbValue> {
        self.pairs.iter().find(|(c, _)| c == column).map(|(_, v)| v)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(c, _)| c.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &DbValue> {
        self.pairs.iter().map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// `self` followed by the columns of `other` not already present.
    pub fn merged(&self, other: &Assignments) -> Assignments {
        let mut out = self.clone();
        for (column, value) in &other.pairs {
            if out.get(column).is_none() {
                out.pairs.push((column.clone(), value.clone()));
            }
        }
        out
    }
}

/// A row with a natural key.
pub trait TableRecord {
    /// Columns that identify the row (the WHERE of an update).
    fn natural_key(&self) -> Assignments;

    /// Columns written on update or insert.
    fn assignments(&self) -> Assignments;
}

/// Per-night analysis record of a whole-night close.
///
/// Keyed by telescope + night. Raw data volume, raw file count and finish
/// time are not part of this table; they live in the lock report and
/// [`NightSummaryRecord`].
#[derive(Debug, Clone, PartialEq)]
pub struct NightAnalysisRecord {
    pub telescope: String,
    /// `YYYY-MM-DD`
    pub night: String,
    pub sequences: i64,
    /// Produced files per concept.
    pub concept_counts: BTreeMap<String, i64>,
    pub comments: Option<String>,
    pub is_closed: bool,
}

impl TableRecord for NightAnalysisRecord {
    fn natural_key(&self) -> Assignments {
        Assignments::new()
            .set("telescope", self.telescope.as_str())
            .set("night", self.night.as_str())
    }

    fn assignments(&self) -> Assignments {
        // BTreeMap keeps the JSON stable across runs.
        let counts = serde_json::to_string(&self.concept_counts).unwrap_or_else(|_| "{}".into());
        Assignments::new()
            .set("sequences", self.sequences)
            .set("concept_counts", counts)
            .set_opt("comments", self.comments.clone())
            .set("is_closed", self.is_closed)
            .set("updated_at", DbTimestamp::now())
    }
}

/// Completion flag read by the downstream transfer process.
///
/// Keyed by telescope + night + activity.
#[derive(Debug, Clone, PartialEq)]
pub struct NightSummaryRecord {
    pub telescope: String,
    pub night: String,
    pub activity: String,
    pub is_finished: bool,
    pub end_time: DbTimestamp,
}

impl TableRecord for NightSummaryRecord {
    fn natural_key(&self) -> Assignments {
        Assignments::new()
            .set("telescope", self.telescope.as_str())
            .set("night", self.night.as_str())
            .set("activity", self.activity.as_str())
    }

    fn assignments(&self) -> Assignments {
        Assignments::new()
            .set("is_finished", self.is_finished)
            .set("end_time", self.end_time.clone())
    }
}

/// Provenance of one promoted file.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFileRecord {
    pub telescope: String,
    pub night: String,
    pub run_id: u32,
    pub concept: String,
    pub file_name: String,
    pub destination: String,
    pub size_bytes: u64,
    /// blake3 hex digest
    pub checksum: String,
}

impl TableRecord for RunFileRecord {
    fn natural_key(&self) -> Assignments {
        Assignments::new()
            .set("destination", self.destination.as_str())
            .set("file_name", self.file_name.as_str())
    }

    fn assignments(&self) -> Assignments {
        Assignments::new()
            .set("telescope", self.telescope.as_str())
            .set("night", self.night.as_str())
            .set("run_id", self.run_id)
            .set("concept", self.concept.as_str())
            .set("size_bytes", self.size_bytes)
            .set("checksum", self.checksum.as_str())
            .set("registered_at", DbTimestamp::now())
    }
}
