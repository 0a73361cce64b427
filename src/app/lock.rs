use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another run holds {path} (age {age_secs}s)")]
    Held { path: PathBuf, age_secs: u64 },
    #[error("failed to manage lock file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Keeps overlapping invocations from racing on the credential file.
/// The lock file is removed when the guard is dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self, LockError> {
        let io_error = |source: io::Error| LockError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(io_error)?;
        }

        match create_lock_file(path) {
            Ok(()) => return Ok(Self::held_at(path)),
            Err(error) if error.kind() != io::ErrorKind::AlreadyExists => {
                return Err(io_error(error));
            }
            Err(_) => {}
        }

        let age = fs::metadata(path)
            .and_then(|metadata| metadata.modified())
            .map_err(io_error)?
            .elapsed()
            .unwrap_or_default();

        if age < stale_after {
            return Err(LockError::Held {
                path: path.to_path_buf(),
                age_secs: age.as_secs(),
            });
        }

        tracing::warn!(
            path = %path.display(),
            age_secs = age.as_secs(),
            "taking over stale run lock"
        );
        fs::remove_file(path).map_err(io_error)?;
        create_lock_file(path).map_err(io_error)?;

        Ok(Self::held_at(path))
    }

    fn held_at(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %error, "failed to release run lock");
        }
    }
}

fn create_lock_file(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{}", std::process::id())
}
