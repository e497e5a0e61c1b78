//! Single-instance enforcement via a lock file.
//!
//! Two copies of the app would both grab the hotkey and the microphone;
//! the second one started should exit instead.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Holds the instance lock for the process lifetime; releases it on drop.
pub struct InstanceGuard {
    path: PathBuf,
}

impl InstanceGuard {
    /// Try to become the single running instance.
    ///
    /// Returns `None` if another instance already holds the lock.
    ///
    /// # Errors
    /// Returns error if the lock directory cannot be created or written
    pub fn acquire() -> Result<Option<Self>> {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Self::acquire_at(PathBuf::from(home).join(".pushtalk").join("instance.lock"))
    }

    fn acquire_at(path: PathBuf) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("failed to create lock directory")?;
        }

        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                // Pid recorded for diagnostics only; staleness after a crash
                // is resolved by deleting the file manually.
                let _ = write!(file, "{}", std::process::id());
                debug!(path = %path.display(), "instance lock acquired");
                Ok(Some(Self { path }))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "instance lock already held");
                Ok(None)
            }
            Err(e) => Err(e).context("failed to create instance lock"),
        }
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("failed to remove instance lock: {}", e);
        }
    }
}
