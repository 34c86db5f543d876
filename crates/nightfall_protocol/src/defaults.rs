//! Canonical default values shared by the closer and the sequence runners.

pub const DEFAULT_TELESCOPE: &str = "LST1";
pub const DEFAULT_PROD_ID: &str = "v0.1.0";
pub const DEFAULT_CALIB_PROD_ID: &str = "v01";
pub const DEFAULT_DL1_PROD_ID: &str = "tailcut84";
pub const DEFAULT_DL2_PROD_ID: &str = "model1";

pub const DEFAULT_LOCK_BASENAME: &str = "NightFinished.txt";
pub const DEFAULT_HISTORY_SUFFIX: &str = ".history";
pub const DEFAULT_CLOSED_SUFFIX: &str = ".closed";
pub const DEFAULT_STAGED_SUFFIX: &str = "";
pub const DEFAULT_INCIDENCES_BASENAME: &str = "Incidences.txt";
pub const DEFAULT_NIGHT_SUMMARY_PREFIX: &str = "NightSummary_";
pub const DEFAULT_RAW_PATTERN: &str = r"\.fits\.fz$";

/// UTC hour at which the observing night rolls over.
pub const DEFAULT_NIGHT_OFFSET_HOURS: i32 = 12;

pub const DEFAULT_ACTIVITY: &str = "OSA";
pub const DEFAULT_ANALYSIS_TABLE: &str = "night_analysis";
pub const DEFAULT_SUMMARY_TABLE: &str = "night_summary";
pub const DEFAULT_FILES_TABLE: &str = "run_files";

pub const DEFAULT_REMOTE_PROGRAM: &str = "scp";
pub const DEFAULT_REMOTE_PORT: u16 = 22;
pub const DEFAULT_REMOTE_SUFFIX: &str = ".nightfinished.txt";

pub const CONFIG_FILE_NAME: &str = "nightfall.toml";
