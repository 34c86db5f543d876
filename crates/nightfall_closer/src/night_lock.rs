//! The night lock: its existence alone means the night is closed.

use nightfall_protocol::NightPaths;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NightLock {
    path: PathBuf,
}

/// Outcome of [`NightLock::create`].
#[derive(Debug)]
pub enum LockCreateError {
    /// Another closer got there first.
    AlreadyExists,
    Io(io::Error),
}

impl NightLock {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_night(paths: &NightPaths<'_>) -> Self {
        Self::new(paths.lock_file())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_day_closed(&self) -> bool {
        self.path.exists()
    }

    /// Closing report stored in the lock.
    pub fn read_report(&self) -> io::Result<String> {
        fs::read_to_string(&self.path)
    }

    /// Create the parent directory, then the lock with `report` as content.
    ///
    /// The lock is opened with `create_new`: if it already exists nothing is
    /// written and [`LockCreateError::AlreadyExists`] is returned.
    pub fn create(&self, report: &str) -> Result<(), LockCreateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(LockCreateError::Io)?;
        }
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LockCreateError::AlreadyExists)
            }
            Err(e) => return Err(LockCreateError::Io(e)),
        };
        file.write_all(report.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(LockCreateError::Io)?;
        info!(lock = %self.path.display(), "Night lock created");
        Ok(())
    }
}
