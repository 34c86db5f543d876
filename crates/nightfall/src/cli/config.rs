//! Configuration file resolution.

use super::error::HelpfulError;
use super::GlobalArgs;
use anyhow::{Context, Result};
use nightfall_logging::nightfall_home;
use nightfall_protocol::defaults::CONFIG_FILE_NAME;
use nightfall_protocol::NightfallConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// `$NIGHTFALL_HOME/nightfall.toml`
pub fn default_config_path() -> PathBuf {
    nightfall_home().join(CONFIG_FILE_NAME)
}

/// Load `explicit`, or the default file if present, or built-in defaults.
///
/// A missing explicit file is an error; a missing default file is not.
pub fn load(explicit: Option<&Path>) -> Result<NightfallConfig> {
    match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(HelpfulError::config_not_found(path).into());
            }
            NightfallConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))
        }
        None => {
            let path = default_config_path();
            if path.exists() {
                debug!(path = %path.display(), "Loading configuration");
                NightfallConfig::load(&path)
                    .with_context(|| format!("Failed to load {}", path.display()))
            } else {
                info!(path = %path.display(), "No configuration file, using defaults");
                Ok(NightfallConfig::default())
            }
        }
    }
}

pub fn show(global: &GlobalArgs, path_only: bool) -> Result<u8> {
    if path_only {
        let path = global.config.clone().unwrap_or_else(default_config_path);
        println!("{}", path.display());
        return Ok(0);
    }
    let config = global.load_config()?;
    print!("{}", config.to_toml_string()?);
    Ok(0)
}
