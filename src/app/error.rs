use thiserror::Error;

use crate::adapters::credentials_file::CredentialStoreError;
use crate::app::lock::LockError;
use crate::app::runtime::RunError;
use crate::app::session::{AuthError, FetchError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("credentials unavailable: {0}")]
    Credentials(#[from] CredentialStoreError),
    #[error("credential `{0}` is not set")]
    CredentialUnavailable(&'static str),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("flume api request failed: {0}")]
    Api(#[from] FetchError),
    #[error("{0}")]
    Lock(#[from] LockError),
    #[error("failed to initialize database: {0}")]
    DatabaseInit(String),
    #[error("runtime failure: {0}")]
    Runtime(String),
}

impl AppError {
    pub fn logging_init<E: std::fmt::Display>(error: E) -> Self {
        Self::LoggingInit(error.to_string())
    }

    pub fn config<E: std::fmt::Display>(error: E) -> Self {
        Self::Config(error.to_string())
    }

    pub fn database_init<E: std::fmt::Display>(error: E) -> Self {
        Self::DatabaseInit(error.to_string())
    }

    pub fn runtime<E: std::fmt::Display>(error: E) -> Self {
        Self::Runtime(error.to_string())
    }
}

impl From<RunError> for AppError {
    fn from(error: RunError) -> Self {
        match error {
            RunError::Credentials(error) => Self::Credentials(error),
            RunError::CredentialUnavailable(name) => Self::CredentialUnavailable(name),
            RunError::Auth(error) => Self::Auth(error),
            RunError::Window(error) => Self::config(error),
        }
    }
}
