//! TOML configuration for the closer and the sequence runners.
//!
//! Every field has a serde default, so a file only needs the keys that
//! differ from the LST-1 layout.

use crate::defaults::*;
use crate::error::{ProtocolError, Result};
use crate::types::{ProductKind, RunKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NightfallConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub prod: ProdConfig,

    #[serde(default)]
    pub night: NightConfig,

    /// Output categories, in the priority order the reconciler applies them.
    #[serde(default = "default_concepts")]
    pub concepts: Vec<ConceptSpec>,

    #[serde(default)]
    pub steps: StepsConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub remote: RemoteConfig,
}

impl Default for NightfallConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            prod: ProdConfig::default(),
            night: NightConfig::default(),
            concepts: default_concepts(),
            steps: StepsConfig::default(),
            database: DatabaseConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl NightfallConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ProtocolError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ProtocolError::ConfigParse { message, .. } => ProtocolError::ConfigParse {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ProtocolError::ConfigParse {
            path: PathBuf::new(),
            message: e.to_string(),
        })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ProtocolError::ConfigSerialize(e.to_string()))
    }

    /// Step table for a run kind.
    pub fn steps_for(&self, kind: RunKind) -> &[StepSpec] {
        match kind {
            RunKind::Data => &self.steps.data,
            RunKind::Pedcalib => &self.steps.pedcalib,
        }
    }

    /// Production id a step of the given product kind is stamped with.
    pub fn product_id(&self, product: ProductKind) -> &str {
        match product {
            ProductKind::Calib => &self.prod.calib_prod_id,
            ProductKind::Dl1 => &self.prod.dl1_prod_id,
            ProductKind::Dl2 => &self.prod.dl2_prod_id,
        }
    }

    pub fn concept(&self, name: &str) -> Option<&ConceptSpec> {
        self.concepts.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root of the per-night staging ("running analysis") directories.
    #[serde(default = "default_analysis_dir")]
    pub analysis_dir: PathBuf,
    /// Root that relative concept destinations are resolved against.
    #[serde(default = "default_destination_root")]
    pub destination_root: PathBuf,
    /// Root of the per-night lock files.
    #[serde(default = "default_closer_dir")]
    pub closer_dir: PathBuf,
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "default_systematics_dir")]
    pub systematics_dir: PathBuf,
    #[serde(default = "default_night_summary_dir")]
    pub night_summary_dir: PathBuf,
    #[serde(default = "default_lock_basename")]
    pub lock_basename: String,
    #[serde(default = "default_history_suffix")]
    pub history_suffix: String,
    #[serde(default = "default_closed_suffix")]
    pub closed_suffix: String,
    /// Only staged files ending with this suffix are reconciled.
    #[serde(default = "default_staged_suffix")]
    pub staged_suffix: String,
    #[serde(default = "default_incidences_basename")]
    pub incidences_basename: String,
    #[serde(default = "default_night_summary_prefix")]
    pub night_summary_prefix: String,
    /// Regex selecting raw data files when measuring the night's volume.
    #[serde(default = "default_raw_pattern")]
    pub raw_pattern: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            analysis_dir: default_analysis_dir(),
            destination_root: default_destination_root(),
            closer_dir: default_closer_dir(),
            raw_dir: default_raw_dir(),
            systematics_dir: default_systematics_dir(),
            night_summary_dir: default_night_summary_dir(),
            lock_basename: default_lock_basename(),
            history_suffix: default_history_suffix(),
            closed_suffix: default_closed_suffix(),
            staged_suffix: default_staged_suffix(),
            incidences_basename: default_incidences_basename(),
            night_summary_prefix: default_night_summary_prefix(),
            raw_pattern: default_raw_pattern(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProdConfig {
    #[serde(default = "default_prod_id")]
    pub prod_id: String,
    #[serde(default = "default_calib_prod_id")]
    pub calib_prod_id: String,
    #[serde(default = "default_dl1_prod_id")]
    pub dl1_prod_id: String,
    #[serde(default = "default_dl2_prod_id")]
    pub dl2_prod_id: String,
}

impl Default for ProdConfig {
    fn default() -> Self {
        Self {
            prod_id: default_prod_id(),
            calib_prod_id: default_calib_prod_id(),
            dl1_prod_id: default_dl1_prod_id(),
            dl2_prod_id: default_dl2_prod_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NightConfig {
    #[serde(default = "default_offset_hours")]
    pub offset_hours: i32,
    #[serde(default = "default_telescope")]
    pub telescope: String,
}

impl Default for NightConfig {
    fn default() -> Self {
        Self {
            offset_hours: default_offset_hours(),
            telescope: default_telescope(),
        }
    }
}

/// A named category of output product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptSpec {
    pub name: String,
    /// Regex matched against the staged file name.
    pub pattern: String,
    /// Destination directory template (`{night}`, `{prod_id}`, ...).
    pub destination: String,
}

impl ConceptSpec {
    pub fn new(name: &str, pattern: &str, destination: &str) -> Self {
        Self {
            name: name.to_string(),
            pattern: pattern.to_string(),
            destination: destination.to_string(),
        }
    }
}

/// One external processing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Ledger key for this step.
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub product: ProductKind,
    /// Template of the step's main input; its basename goes into the ledger.
    #[serde(default)]
    pub input: String,
    /// Template of the step's configuration file; its basename goes into the ledger.
    #[serde(default)]
    pub config: String,
}

impl StepSpec {
    pub fn new(name: &str, program: &str, product: ProductKind) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: Vec::new(),
            product,
            input: String::new(),
            config: String::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_input(mut self, input: &str) -> Self {
        self.input = input.to_string();
        self
    }

    pub fn with_config(mut self, config: &str) -> Self {
        self.config = config.to_string();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepsConfig {
    /// Configuration file handed to the lstchain steps.
    #[serde(default = "default_lstchain_config")]
    pub lstchain_config: PathBuf,
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,
    #[serde(default = "default_data_steps")]
    pub data: Vec<StepSpec>,
    #[serde(default = "default_pedcalib_steps")]
    pub pedcalib: Vec<StepSpec>,
}

impl Default for StepsConfig {
    fn default() -> Self {
        Self {
            lstchain_config: default_lstchain_config(),
            models_dir: default_models_dir(),
            data: default_data_steps(),
            pedcalib: default_pedcalib_steps(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
    #[serde(default = "default_analysis_table")]
    pub analysis_table: String,
    #[serde(default = "default_summary_table")]
    pub summary_table: String,
    #[serde(default = "default_files_table")]
    pub files_table: String,
    #[serde(default = "default_activity")]
    pub activity: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            analysis_table: default_analysis_table(),
            summary_table: default_summary_table(),
            files_table: default_files_table(),
            activity: default_activity(),
        }
    }
}

/// Monitoring host receiving a copy of each night's lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default = "default_remote_port")]
    pub port: u16,
    #[serde(default)]
    pub directory: PathBuf,
    #[serde(default = "default_remote_suffix")]
    pub suffix: String,
    #[serde(default = "default_remote_program")]
    pub program: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            user: String::new(),
            port: default_remote_port(),
            directory: PathBuf::new(),
            suffix: default_remote_suffix(),
            program: default_remote_program(),
        }
    }
}

fn nightfall_root() -> PathBuf {
    if let Ok(override_path) = std::env::var("NIGHTFALL_DATA") {
        return PathBuf::from(override_path);
    }
    PathBuf::from("/fefs/aswg/data/real")
}

fn default_analysis_dir() -> PathBuf {
    nightfall_root().join("running_analysis")
}

fn default_destination_root() -> PathBuf {
    nightfall_root()
}

fn default_closer_dir() -> PathBuf {
    nightfall_root().join("OSA").join("Closer")
}

fn default_raw_dir() -> PathBuf {
    nightfall_root().join("R0")
}

fn default_systematics_dir() -> PathBuf {
    nightfall_root()
        .join("monitoring")
        .join("PixelCalibration")
        .join("ffactor_systematics")
}

fn default_night_summary_dir() -> PathBuf {
    nightfall_root().join("monitoring").join("NightSummary")
}

fn default_lock_basename() -> String {
    DEFAULT_LOCK_BASENAME.to_string()
}

fn default_history_suffix() -> String {
    DEFAULT_HISTORY_SUFFIX.to_string()
}

fn default_closed_suffix() -> String {
    DEFAULT_CLOSED_SUFFIX.to_string()
}

fn default_staged_suffix() -> String {
    DEFAULT_STAGED_SUFFIX.to_string()
}

fn default_incidences_basename() -> String {
    DEFAULT_INCIDENCES_BASENAME.to_string()
}

fn default_night_summary_prefix() -> String {
    DEFAULT_NIGHT_SUMMARY_PREFIX.to_string()
}

fn default_raw_pattern() -> String {
    DEFAULT_RAW_PATTERN.to_string()
}

fn default_prod_id() -> String {
    DEFAULT_PROD_ID.to_string()
}

fn default_calib_prod_id() -> String {
    DEFAULT_CALIB_PROD_ID.to_string()
}

fn default_dl1_prod_id() -> String {
    DEFAULT_DL1_PROD_ID.to_string()
}

fn default_dl2_prod_id() -> String {
    DEFAULT_DL2_PROD_ID.to_string()
}

fn default_offset_hours() -> i32 {
    DEFAULT_NIGHT_OFFSET_HOURS
}

fn default_telescope() -> String {
    DEFAULT_TELESCOPE.to_string()
}

fn default_database_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".nightfall").join("nightfall.duckdb"))
        .unwrap_or_else(|| PathBuf::from("nightfall.duckdb"))
}

fn default_analysis_table() -> String {
    DEFAULT_ANALYSIS_TABLE.to_string()
}

fn default_summary_table() -> String {
    DEFAULT_SUMMARY_TABLE.to_string()
}

fn default_files_table() -> String {
    DEFAULT_FILES_TABLE.to_string()
}

fn default_activity() -> String {
    DEFAULT_ACTIVITY.to_string()
}

fn default_remote_port() -> u16 {
    DEFAULT_REMOTE_PORT
}

fn default_remote_suffix() -> String {
    DEFAULT_REMOTE_SUFFIX.to_string()
}

fn default_remote_program() -> String {
    DEFAULT_REMOTE_PROGRAM.to_string()
}

fn default_lstchain_config() -> PathBuf {
    PathBuf::from("cfg/lstchain_standard_config.json")
}

fn default_models_dir() -> PathBuf {
    nightfall_root().join("models")
}

fn default_concepts() -> Vec<ConceptSpec> {
    let calib = "calibration/{night}/{calib_prod_id}";
    let dl1 = "DL1/{night}/{prod_id}";
    let dl1ab = "DL1/{night}/{prod_id}/{dl1_prod_id}";
    let dl2 = "DL2/{night}/{prod_id}/{dl1_prod_id}_{dl2_prod_id}";
    vec![
        ConceptSpec::new("PEDESTAL", r"^drs4_pedestal\.Run", calib),
        ConceptSpec::new("TIMECALIB", r"^time_calibration\.Run", calib),
        ConceptSpec::new("CALIB", r"^calibration.*\.Run", calib),
        ConceptSpec::new("DATACHECK", r"^datacheck_dl1_", dl1ab),
        ConceptSpec::new("DL1AB", r"^dl1_.*\.h5$", dl1ab),
        ConceptSpec::new("MUON", r"^muons_", dl1),
        ConceptSpec::new("DL2", r"^dl2_", dl2),
    ]
}

fn default_data_steps() -> Vec<StepSpec> {
    vec![
        StepSpec::new("R0_TO_DL1", "lstchain_data_r0_to_dl1", ProductKind::Dl1)
            .with_args([
                "--input-file={raw_dir}/{night}/LST-1.1.Run{run_str}.0000.fits.fz",
                "--output-dir={analysis_dir}",
                "--pedestal-file={pedestal_file}",
                "--calibration-file={calibration_file}",
                "--time-calibration-file={time_calibration_file}",
                "--systematic-correction-file={systematic_correction_file}",
                "--config={lstchain_config}",
            ])
            .with_input("{calibration_file}")
            .with_config("{lstchain_config}"),
        StepSpec::new("DL1_DATACHECK", "lstchain_check_dl1", ProductKind::Dl1)
            .with_args([
                "--input-file={analysis_dir}/dl1_LST-1.Run{run_str}.0000.h5",
                "--output-dir={analysis_dir}",
            ])
            .with_input("{analysis_dir}/dl1_LST-1.Run{run_str}.0000.h5")
            .with_config("{lstchain_config}"),
        StepSpec::new("DL1_TO_DL2", "lstchain_dl1_to_dl2", ProductKind::Dl2)
            .with_args([
                "--input-file={analysis_dir}/dl1_LST-1.Run{run_str}.0000.h5",
                "--output-dir={analysis_dir}",
                "--path-models={models_dir}",
                "--config={lstchain_config}",
            ])
            .with_input("{analysis_dir}/dl1_LST-1.Run{run_str}.0000.h5")
            .with_config("{lstchain_config}"),
    ]
}

fn default_pedcalib_steps() -> Vec<StepSpec> {
    vec![
        StepSpec::new(
            "DRS4_PEDESTAL",
            "lstchain_data_create_drs4_pedestal_file",
            ProductKind::Calib,
        )
        .with_args([
            "--input-file={raw_dir}/{night}/LST-1.1.Run{run_str}.0000.fits.fz",
            "--output-file={pedestal_file}",
            "--max-events=20000",
            "--overwrite",
        ])
        .with_input("{pedestal_file}"),
        StepSpec::new("CALIB", "lstchain_create_calibration_file", ProductKind::Calib)
            .with_args([
                "--input_file={raw_dir}/{night}/LST-1.1.Run{run_str}.0000.fits.fz",
                "--output_file={calibration_file}",
                "--LSTCalibrationCalculator.systematic_correction_path={systematic_correction_file}",
                "--LSTEventSource.LSTR0Corrections.drs4_pedestal_path={pedestal_file}",
            ])
            .with_input("{calibration_file}")
            .with_config("{lstchain_config}"),
        StepSpec::new(
            "TIMECALIB",
            "lstchain_data_create_time_calibration_file",
            ProductKind::Calib,
        )
        .with_args([
            "--input-file={raw_dir}/{night}/LST-1.1.Run{run_str}.000*.fits.fz",
            "--output-file={time_calibration_file}",
            "--pedestal-file={pedestal_file}",
            "--max-events=53000",
        ])
        .with_input("{time_calibration_file}"),
    ]
}
