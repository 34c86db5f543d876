//! Core domain types: nights, runs, sequences.

use crate::error::ProtocolError;
use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const NIGHT_FORMAT: &str = "%Y_%m_%d";

/// Pipeline kind that processes a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunKind {
    /// Raw observation data: reduction down to DL2
    Data,
    /// Pedestal + charge calibration run
    Pedcalib,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Data => "DATA",
            RunKind::Pedcalib => "PEDCALIB",
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RunKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DATA" => Ok(RunKind::Data),
            "PEDCALIB" | "CALIBRATION" => Ok(RunKind::Pedcalib),
            _ => Err(ProtocolError::InvalidRunKind(s.to_string())),
        }
    }
}

/// Which production id a processing step stamps its ledger entries with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Calib,
    Dl1,
    Dl2,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::Calib => "calib",
            ProductKind::Dl1 => "dl1",
            ProductKind::Dl2 => "dl2",
        }
    }
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProductKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "calib" => Ok(ProductKind::Calib),
            "dl1" => Ok(ProductKind::Dl1),
            "dl2" => Ok(ProductKind::Dl2),
            _ => Err(ProtocolError::InvalidProductKind(s.to_string())),
        }
    }
}

/// One observing night.
///
/// Written `YYYY_MM_DD` on the command line, `YYYYMMDD` in directory
/// names and `YYYY-MM-DD` in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NightDate(NaiveDate);

impl NightDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn parse(value: &str) -> Result<Self, ProtocolError> {
        NaiveDate::parse_from_str(value, NIGHT_FORMAT)
            .map(Self)
            .map_err(|_| ProtocolError::InvalidDate {
                value: value.to_string(),
            })
    }

    /// The night currently being observed.
    pub fn current(offset_hours: i32) -> Self {
        Self::at(Utc::now(), offset_hours)
    }

    /// The observing night an instant belongs to.
    ///
    /// The date changes at `offset_hours` UTC instead of midnight. A
    /// negative offset moves the rollover into the previous calendar day.
    pub fn at(now: DateTime<Utc>, offset_hours: i32) -> Self {
        let hour = now.hour() as i32;
        let date = now.date_naive();
        let date = if (offset_hours >= 0 && hour >= offset_hours)
            || (offset_hours < 0 && hour < offset_hours + 24)
        {
            date
        } else if offset_hours >= 0 {
            date - Duration::days(1)
        } else {
            date + Duration::days(1)
        };
        Self(date)
    }

    /// Flat directory form: `YYYYMMDD`.
    pub fn to_dir(&self) -> String {
        self.0.format("%Y%m%d").to_string()
    }

    /// ISO form used in database records: `YYYY-MM-DD`.
    pub fn to_iso(&self) -> String {
        self.0.format("%Y-%m-%d").to_string()
    }

    pub fn as_naive(&self) -> NaiveDate {
        self.0
    }
}

impl fmt::Display for NightDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(NIGHT_FORMAT))
    }
}

impl FromStr for NightDate {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Per-invocation options, built once from the command line and passed by
/// reference to every component.
#[derive(Debug, Clone)]
pub struct NightContext {
    pub telescope: String,
    pub night: NightDate,
    /// Log every decision, mutate nothing.
    pub simulate: bool,
    /// Assume "yes" for every operator question.
    pub non_interactive: bool,
    /// Close only the sequence whose run identifier matches this string.
    pub sequence_to_close: Option<String>,
    /// Operator-supplied reason when there is no data for the night.
    pub reason: Option<String>,
    /// Derive the sequence list from the night summary file.
    pub use_night_summary: bool,
}

impl NightContext {
    pub fn new(telescope: impl Into<String>, night: NightDate) -> Self {
        Self {
            telescope: telescope.into(),
            night,
            simulate: false,
            non_interactive: false,
            sequence_to_close: None,
            reason: None,
            use_night_summary: true,
        }
    }

    pub fn is_partial_close(&self) -> bool {
        self.sequence_to_close.is_some()
    }
}

/// Calibration products a sequence consumes. Resolved by [`crate::NightPaths`],
/// not owned by the sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalibrationArtifacts {
    pub pedestal: Option<PathBuf>,
    pub calibration: Option<PathBuf>,
    pub time_calibration: Option<PathBuf>,
    pub systematic_correction: Option<PathBuf>,
}

/// One run and the pipeline kind processing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// Position in the night's sequence list.
    pub seq_index: usize,
    pub telescope: String,
    pub run_id: u32,
    pub run_kind: RunKind,
    pub subrun_count: u32,
    /// Index of the calibration sequence this one depends on.
    pub parent: Option<usize>,
    pub parent_run: Option<u32>,
    pub staging_dir: PathBuf,
    pub artifacts: CalibrationArtifacts,
}

impl Sequence {
    pub fn new(
        seq_index: usize,
        telescope: impl Into<String>,
        run_id: u32,
        run_kind: RunKind,
        subrun_count: u32,
        staging_dir: impl AsRef<Path>,
    ) -> Self {
        Self {
            seq_index,
            telescope: telescope.into(),
            run_id,
            run_kind,
            subrun_count,
            parent: None,
            parent_run: None,
            staging_dir: staging_dir.as_ref().to_path_buf(),
            artifacts: CalibrationArtifacts::default(),
        }
    }

    /// Zero-padded run identifier, as it appears in file names: `01805`.
    pub fn run_str(&self) -> String {
        format!("{:05}", self.run_id)
    }

    /// `LST1_01805`
    pub fn job_name(&self) -> String {
        format!("{}_{}", self.telescope, self.run_str())
    }

    pub fn history_file(&self, history_suffix: &str) -> PathBuf {
        self.staging_dir
            .join(format!("sequence_{}{}", self.job_name(), history_suffix))
    }

    pub fn closed_marker(&self, closed_suffix: &str) -> PathBuf {
        self.staging_dir
            .join(format!("sequence_{}{}", self.job_name(), closed_suffix))
    }

    /// The run whose calibration products this sequence uses.
    pub fn calibration_run(&self) -> u32 {
        match self.run_kind {
            RunKind::Pedcalib => self.run_id,
            RunKind::Data => self.parent_run.unwrap_or(self.run_id),
        }
    }
}
