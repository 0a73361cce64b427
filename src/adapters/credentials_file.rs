use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::credentials::{CredentialError, Credentials};

pub trait CredentialStore {
    fn load(&self) -> Result<Credentials, CredentialStoreError>;
    fn save(&self, credentials: &Credentials) -> Result<(), CredentialStoreError>;
}

#[derive(Debug, Error)]
pub enum CredentialStoreError {
    #[error("credential file {0} does not exist")]
    NotFound(PathBuf),
    #[error("failed to access credential file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("credential file {path} is not valid YAML: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("failed to serialize credentials for {path}: {source}")]
    Serialize {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("credential file {path} is incomplete: {source}")]
    Invalid {
        path: PathBuf,
        source: CredentialError,
    },
}

pub fn default_credentials_path(home: &Path) -> PathBuf {
    home.join(".credentials").join("flume.yaml")
}

#[derive(Debug, Clone)]
pub struct YamlCredentialFile {
    path: PathBuf,
}

impl YamlCredentialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: io::Error) -> CredentialStoreError {
        CredentialStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl CredentialStore for YamlCredentialFile {
    fn load(&self) -> Result<Credentials, CredentialStoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(CredentialStoreError::NotFound(self.path.clone()));
            }
            Err(error) => return Err(self.io_error(error)),
        };

        let credentials: Credentials =
            serde_yaml::from_str(&content).map_err(|source| CredentialStoreError::Parse {
                path: self.path.clone(),
                source,
            })?;

        credentials
            .validate()
            .map_err(|source| CredentialStoreError::Invalid {
                path: self.path.clone(),
                source,
            })?;

        Ok(credentials)
    }

    /// Replaces the file atomically so an interrupted save never leaves a
    /// truncated record behind.
    fn save(&self, credentials: &Credentials) -> Result<(), CredentialStoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|error| self.io_error(error))?;
        }

        let yaml = serde_yaml::to_string(credentials).map_err(|source| CredentialStoreError::Serialize {
            path: self.path.clone(),
            source,
        })?;

        let staging = self.path.with_extension("yaml.tmp");
        fs::write(&staging, yaml).map_err(|error| self.io_error(error))?;
        restrict_permissions(&staging).map_err(|error| self.io_error(error))?;
        fs::rename(&staging, &self.path).map_err(|error| self.io_error(error))?;

        tracing::debug!(path = %self.path.display(), "credentials saved");
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
