//! Append-only per-run history file.
//!
//! One line per step execution:
//!
//! ```text
//! <run_id> <step> <product_id> <timestamp> <input> <config> <exit_code>
//! ```
//!
//! Older files carry timestamps with spaces (`Fri Jan 17 23:10:02 UTC 2020`),
//! so a line is read as three leading fields, three trailing fields and
//! whatever lies between as the timestamp.

use crate::error::{HistoryParseError, Result, RunnerError};
use crate::steps::StepTable;
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, warn};

/// Placeholder written for an empty field.
const EMPTY_FIELD: &str = "-";

/// One executed step. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub run_id: String,
    pub step: String,
    pub product_id: String,
    pub timestamp: String,
    pub input_ref: String,
    pub config_ref: String,
    pub exit_code: i32,
}

impl HistoryEntry {
    /// Entry stamped with the current UTC time.
    pub fn now(
        run_id: &str,
        step: &str,
        product_id: &str,
        input_ref: &str,
        config_ref: &str,
        exit_code: i32,
    ) -> Self {
        Self {
            run_id: field(run_id),
            step: field(step),
            product_id: field(product_id),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            input_ref: field(input_ref),
            config_ref: field(config_ref),
            exit_code,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// Fields are whitespace separated; keep each one a single token.
fn field(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return EMPTY_FIELD.to_string();
    }
    trimmed
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect()
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {} {} {}",
            self.run_id,
            self.step,
            self.product_id,
            self.timestamp,
            self.input_ref,
            self.config_ref,
            self.exit_code
        )
    }
}

impl FromStr for HistoryEntry {
    type Err = HistoryParseError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 7 {
            return Err(HistoryParseError::new(format!(
                "expected at least 7 fields, found {}",
                tokens.len()
            )));
        }
        let n = tokens.len();
        let exit_code = tokens[n - 1]
            .parse::<i32>()
            .map_err(|_| HistoryParseError::new(format!("bad exit code '{}'", tokens[n - 1])))?;
        Ok(Self {
            run_id: tokens[0].to_string(),
            step: tokens[1].to_string(),
            product_id: tokens[2].to_string(),
            timestamp: tokens[3..n - 3].join(" "),
            input_ref: tokens[n - 3].to_string(),
            config_ref: tokens[n - 2].to_string(),
            exit_code,
        })
    }
}

/// Remaining steps of a sequence and the exit code that stopped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingLevel {
    /// Steps left: table length when nothing is done, 0 when finished.
    pub level: usize,
    /// Exit code of the step at the resume point, 0 if it never ran.
    pub exit_code: i32,
}

impl ProcessingLevel {
    pub fn done() -> Self {
        Self {
            level: 0,
            exit_code: 0,
        }
    }

    pub fn is_done(&self) -> bool {
        self.level == 0
    }
}

impl fmt::Display for ProcessingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.level, self.exit_code)
    }
}

/// In-memory view of a history file.
///
/// The file is parsed once on [`HistoryLedger::open`]; afterwards
/// [`HistoryLedger::record`] appends to both the file and the index.
#[derive(Debug)]
pub struct HistoryLedger {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
    /// (run, step) -> position of the authoritative (last) entry
    last: HashMap<(String, String), usize>,
}

impl HistoryLedger {
    /// Read `path`. A missing file is an empty ledger.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut ledger = Self {
            path: path.clone(),
            entries: Vec::new(),
            last: HashMap::new(),
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No history yet");
                return Ok(ledger);
            }
            Err(source) => return Err(RunnerError::Ledger { path, source }),
        };

        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<HistoryEntry>() {
                Ok(entry) => ledger.index(entry),
                Err(e) => warn!(
                    path = %ledger.path.display(),
                    line = lineno + 1,
                    "Skipping history line: {}",
                    e
                ),
            }
        }
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Append `entry` to the file, then to the index.
    pub fn record(&mut self, entry: HistoryEntry) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| RunnerError::Ledger {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{}", entry).map_err(|source| RunnerError::Ledger {
            path: self.path.clone(),
            source,
        })?;
        debug!(
            run_id = %entry.run_id,
            step = %entry.step,
            exit_code = entry.exit_code,
            "Recorded history entry"
        );
        self.index(entry);
        Ok(())
    }

    fn index(&mut self, entry: HistoryEntry) {
        let key = (run_key(&entry.run_id), entry.step.clone());
        self.last.insert(key, self.entries.len());
        self.entries.push(entry);
    }

    /// Authoritative entry for `step` of `run_id`, with its position.
    pub fn last_entry(&self, run_id: &str, step: &str) -> Option<(usize, &HistoryEntry)> {
        self.last
            .get(&(run_key(run_id), step.to_string()))
            .map(|&pos| (pos, &self.entries[pos]))
    }

    /// Where `run_id` has to resume in `table`.
    ///
    /// Walking the table in order, the resume point is the first step whose
    /// authoritative entry is missing, failed, stamped with another
    /// production id, or older than the authoritative entry of the step
    /// before it (an upstream re-run invalidates downstream results).
    pub fn current_level(&self, run_id: &str, table: &StepTable) -> ProcessingLevel {
        let total = table.len();
        let mut previous: Option<usize> = None;

        for (index, step) in table.steps().iter().enumerate() {
            let remaining = total - index;
            let Some((pos, entry)) = self.last_entry(run_id, step.name()) else {
                return ProcessingLevel {
                    level: remaining,
                    exit_code: 0,
                };
            };
            let stale = previous.map_or(false, |p| pos < p);
            if !entry.succeeded() || entry.product_id != step.product_id() || stale {
                debug!(
                    run_id,
                    step = step.name(),
                    exit_code = entry.exit_code,
                    product_id = %entry.product_id,
                    stale,
                    "Resume point"
                );
                return ProcessingLevel {
                    level: remaining,
                    exit_code: entry.exit_code,
                };
            }
            previous = Some(pos);
        }
        ProcessingLevel::done()
    }
}

/// `01805` and `1805` name the same run.
fn run_key(run_id: &str) -> String {
    match run_id.parse::<u64>() {
        Ok(n) => n.to_string(),
        Err(_) => run_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::PlannedStep;

    fn table(steps: &[(&str, &str)]) -> StepTable {
        StepTable::from_steps(
            "TEST",
            steps
                .iter()
                .map(|(name, prod)| PlannedStep::named(name, prod))
                .collect(),
        )
    }

    fn ledger_with(lines: &str) -> (tempfile::TempDir, HistoryLedger) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("sequence_LST1_01805.history");
        fs::write(&path, lines).unwrap();
        let ledger = HistoryLedger::open(&path).unwrap();
        (tmp, ledger)
    }

    #[test]
    fn parses_legacy_timestamp_with_spaces() {
        let entry: HistoryEntry =
            "01805 DRS4_PEDESTAL v01 Fri Jan 17 23:10:02 UTC 2020 drs4.h5 - 0"
                .parse()
                .unwrap();
        assert_eq!(entry.run_id, "01805");
        assert_eq!(entry.step, "DRS4_PEDESTAL");
        assert_eq!(entry.timestamp, "Fri Jan 17 23:10:02 UTC 2020");
        assert_eq!(entry.input_ref, "drs4.h5");
        assert_eq!(entry.exit_code, 0);
    }

    #[test]
    fn written_line_parses_back() {
        let entry = HistoryEntry::now("01805", "CALIB", "v01", "calib file.h5", "", 2);
        let parsed: HistoryEntry = entry.to_string().parse().unwrap();
        assert_eq!(parsed, entry);
        assert_eq!(parsed.input_ref, "calib_file.h5");
        assert_eq!(parsed.config_ref, "-");
    }

    #[test]
    fn rejects_short_or_non_numeric_lines() {
        assert!("1805 CALIB v01 0".parse::<HistoryEntry>().is_err());
        assert!("1805 CALIB v01 ts a b ok".parse::<HistoryEntry>().is_err());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let (_tmp, ledger) = ledger_with(
            "garbage\n\
             1805 A v1 2020-01-17T23:00:00Z a b 0\n\
             \n\
             1805 B v1 2020-01-17T23:05:00Z a b notanumber\n",
        );
        assert_eq!(ledger.entries().len(), 1);
    }

    #[test]
    fn empty_ledger_is_full_level() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ledger = HistoryLedger::open(tmp.path().join("missing.history")).unwrap();
        let level = ledger.current_level("1805", &table(&[("A", "v1"), ("B", "v1")]));
        assert_eq!(level, ProcessingLevel { level: 2, exit_code: 0 });
    }

    #[test]
    fn last_entry_per_step_is_authoritative() {
        let (_tmp, ledger) = ledger_with(
            "1805 A v1 t1 a b 1\n\
             1805 A v1 t2 a b 0\n\
             1805 B v1 t3 a b 0\n",
        );
        let level = ledger.current_level("01805", &table(&[("A", "v1"), ("B", "v1")]));
        assert!(level.is_done());
    }

    #[test]
    fn failed_upstream_step_is_the_resume_point() {
        let (_tmp, ledger) = ledger_with(
            "1805 TIMECALIB v1 t1 a b 0\n\
             1805 CALIB v1 t2 c d 1\n",
        );
        let level = ledger.current_level("1805", &table(&[("CALIB", "v1"), ("TIMECALIB", "v1")]));
        assert_eq!(level, ProcessingLevel { level: 2, exit_code: 1 });
    }

    #[test]
    fn upstream_rerun_invalidates_downstream() {
        let (_tmp, ledger) = ledger_with(
            "1805 CALIB v1 t1 c d 0\n\
             1805 TIMECALIB v1 t2 a b 0\n\
             1805 CALIB v1 t3 c d 0\n",
        );
        let level = ledger.current_level("1805", &table(&[("CALIB", "v1"), ("TIMECALIB", "v1")]));
        assert_eq!(level, ProcessingLevel { level: 1, exit_code: 0 });
    }

    #[test]
    fn other_production_id_reopens_the_step() {
        let (_tmp, ledger) = ledger_with(
            "1805 R0_TO_DL1 tailcut84 t1 a b 0\n\
             1805 DL1_TO_DL2 model1 t2 a b 0\n",
        );
        let old = table(&[("R0_TO_DL1", "tailcut84"), ("DL1_TO_DL2", "model1")]);
        let new = table(&[("R0_TO_DL1", "tailcut84"), ("DL1_TO_DL2", "model2")]);
        assert!(ledger.current_level("1805", &old).is_done());
        assert_eq!(
            ledger.current_level("1805", &new),
            ProcessingLevel { level: 1, exit_code: 0 }
        );
    }

    #[test]
    fn entries_of_other_runs_are_ignored() {
        let (_tmp, ledger) = ledger_with("1806 A v1 t1 a b 0\n");
        let level = ledger.current_level("1805", &table(&[("A", "v1")]));
        assert_eq!(level.level, 1);
    }

    #[test]
    fn level_is_stable_between_calls() {
        let (_tmp, ledger) = ledger_with("1805 A v1 t1 a b 0\n1805 B v1 t2 a b 3\n");
        let t = table(&[("A", "v1"), ("B", "v1"), ("C", "v1")]);
        assert_eq!(ledger.current_level("1805", &t), ledger.current_level("1805", &t));
    }

    #[test]
    fn record_appends_and_updates_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("h.history");
        let mut ledger = HistoryLedger::open(&path).unwrap();
        let t = table(&[("A", "v1")]);

        ledger.record(HistoryEntry::now("1805", "A", "v1", "in", "cfg", 1)).unwrap();
        assert_eq!(ledger.current_level("1805", &t), ProcessingLevel { level: 1, exit_code: 1 });
        ledger.record(HistoryEntry::now("1805", "A", "v1", "in", "cfg", 0)).unwrap();
        assert!(ledger.current_level("1805", &t).is_done());

        let reopened = HistoryLedger::open(&path).unwrap();
        assert_eq!(reopened.entries().len(), 2);
        assert!(reopened.current_level("1805", &t).is_done());
    }

    #[test]
    fn record_fails_when_directory_is_missing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut ledger = HistoryLedger::open(tmp.path().join("nope").join("h.history")).unwrap();
        let err = ledger
            .record(HistoryEntry::now("1805", "A", "v1", "", "", 0))
            .unwrap_err();
        assert!(matches!(err, RunnerError::Ledger { .. }));
    }
}
