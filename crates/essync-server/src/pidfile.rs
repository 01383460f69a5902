//! PID file

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ServerError, ServerResult};

/// A PID file written at startup. Removed only when the process shuts
/// down for good, never after handing its listener to a successor.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Truncate `path` and write the current process id into it
    pub fn create(path: impl AsRef<Path>) -> ServerResult<Self> {
        let path = path.as_ref();
        let pid_err = |source| ServerError::PidFile {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(pid_err)?;
        }
        fs::write(path, std::process::id().to_string()).map_err(pid_err)?;

        debug!("Wrote PID {} to {}", std::process::id(), path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed PID file {}", self.path.display()),
            Err(e) => warn!("Failed to remove PID file {}: {}", self.path.display(), e),
        }
    }
}
