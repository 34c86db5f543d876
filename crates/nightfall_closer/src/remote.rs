//! Copy of the night lock to the monitoring host.

use nightfall_protocol::{NightContext, RemoteConfig};
use std::path::Path;
use std::process::Command;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RemoteSyncError {
    #[error("Cannot launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {code:?}")]
    Failed { command: String, code: Option<i32> },
}

/// Ships the lock file somewhere else. Failures are reported, never fatal.
pub trait RemoteSync {
    fn sync(&self, lock_file: &Path, ctx: &NightContext) -> Result<(), RemoteSyncError>;
}

/// Used when `[remote]` is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRemoteSync;

impl RemoteSync for NoRemoteSync {
    fn sync(&self, _lock_file: &Path, _ctx: &NightContext) -> Result<(), RemoteSyncError> {
        Ok(())
    }
}

/// `scp -P <port> <lock> <user>@<host>:<dir>/<tel>/<night><suffix>`
#[derive(Debug, Clone)]
pub struct ScpSync {
    config: RemoteConfig,
}

impl ScpSync {
    pub fn new(config: RemoteConfig) -> Self {
        Self { config }
    }

    pub fn target(&self, ctx: &NightContext) -> String {
        let remote_path = self
            .config
            .directory
            .join(&ctx.telescope)
            .join(format!("{}{}", ctx.night, self.config.suffix));
        format!(
            "{}@{}:{}",
            self.config.user,
            self.config.host,
            remote_path.display()
        )
    }

    pub fn args(&self, lock_file: &Path, ctx: &NightContext) -> Vec<String> {
        vec![
            "-P".to_string(),
            self.config.port.to_string(),
            lock_file.display().to_string(),
            self.target(ctx),
        ]
    }
}

impl RemoteSync for ScpSync {
    fn sync(&self, lock_file: &Path, ctx: &NightContext) -> Result<(), RemoteSyncError> {
        let args = self.args(lock_file, ctx);
        info!(
            telescope = %ctx.telescope,
            night = %ctx.night,
            target = %self.target(ctx),
            "Copying night lock to the monitoring host"
        );
        let status = Command::new(&self.config.program)
            .args(&args)
            .status()
            .map_err(|source| RemoteSyncError::Launch {
                program: self.config.program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(RemoteSyncError::Failed {
                command: format!("{} {}", self.config.program, args.join(" ")),
                code: status.code(),
            })
        }
    }
}
