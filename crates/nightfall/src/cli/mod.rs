//! Command handlers.

pub mod close;
pub mod config;
pub mod error;
pub mod sequence;

use anyhow::{Context, Result};
use clap::Args;
use nightfall_protocol::{NightContext, NightDate, NightfallConfig};
use std::path::PathBuf;

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Configuration file [default: $NIGHTFALL_HOME/nightfall.toml]
    #[arg(short = 'c', long, global = true, env = "NIGHTFALL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Telescope [default: from the configuration]
    #[arg(short = 't', long, global = true)]
    pub telescope: Option<String>,

    /// Observing night, YYYY_MM_DD [default: the current night]
    #[arg(short = 'd', long, global = true)]
    pub date: Option<String>,

    /// Log every action, change nothing
    #[arg(short = 's', long, global = true)]
    pub simulate: bool,
}

impl GlobalArgs {
    pub fn load_config(&self) -> Result<NightfallConfig> {
        config::load(self.config.as_deref())
    }

    /// The night context for these options, other fields at their defaults.
    pub fn night_context(&self, config: &NightfallConfig) -> Result<NightContext> {
        let night = match &self.date {
            Some(date) => NightDate::parse(date)
                .map_err(|e| error::HelpfulError::invalid_date(date, &e.to_string()))?,
            None => NightDate::current(config.night.offset_hours),
        };
        let telescope = self
            .telescope
            .clone()
            .unwrap_or_else(|| config.night.telescope.clone());
        let mut ctx = NightContext::new(telescope, night);
        ctx.simulate = self.simulate;
        Ok(ctx)
    }
}

/// Config and context in one go.
pub fn setup(global: &GlobalArgs) -> Result<(NightfallConfig, NightContext)> {
    let config = global.load_config()?;
    let ctx = global
        .night_context(&config)
        .context("Invalid night options")?;
    Ok((config, ctx))
}
