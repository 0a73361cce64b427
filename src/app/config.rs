use std::path::{Path, PathBuf};

use crate::adapters::credentials_file::default_credentials_path;
use crate::adapters::flume_api::DEFAULT_API_BASE;
use crate::app::AppError;
use crate::domain::reading::DEFAULT_SERIES;
use crate::domain::retry::DEFAULT_MAX_RETRIES;

/// Hours of history requested on every run. Overlap with earlier runs is
/// absorbed by the upserting sink, so a wide span only costs bandwidth.
pub const DEFAULT_LOOKBACK_HOURS: u32 = 18;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_base: String,
    pub credentials_path: PathBuf,
    pub db_path: String,
    pub lock_path: PathBuf,
    pub lock_stale_secs: u64,
    pub lookback_hours: u32,
    pub max_retries: u32,
    pub http_timeout_secs: u64,
    pub series: String,
    pub log_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        if let Err(error) = dotenvy::dotenv()
            && !error.not_found()
        {
            return Err(AppError::config(format!("failed to read .env: {error}")));
        }

        Self::from_lookup(|key| std::env::var(key).ok(), dirs::home_dir().as_deref())
    }

    fn from_lookup<F>(lookup: F, home: Option<&Path>) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials_path = match non_empty(&lookup, "FLUME_CREDENTIALS_PATH") {
            Some(path) => PathBuf::from(path),
            None => home.map(default_credentials_path).ok_or_else(|| {
                AppError::config("FLUME_CREDENTIALS_PATH is required when no home directory is known")
            })?,
        };

        let lookback_hours = parse_or_default(&lookup, "FLUME_LOOKBACK_HOURS", DEFAULT_LOOKBACK_HOURS)?;
        if lookback_hours == 0 {
            return Err(AppError::config("FLUME_LOOKBACK_HOURS must be at least 1"));
        }

        Ok(Self {
            api_base: non_empty(&lookup, "FLUME_API_BASE")
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            credentials_path,
            db_path: non_empty(&lookup, "FLUME_DB_PATH")
                .unwrap_or_else(|| "./data/flume.db".to_string()),
            lock_path: non_empty(&lookup, "FLUME_LOCK_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/flume.lock")),
            lock_stale_secs: parse_or_default(&lookup, "FLUME_LOCK_STALE_SECS", 900_u64)?,
            lookback_hours,
            max_retries: parse_or_default(&lookup, "FLUME_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            http_timeout_secs: parse_or_default(&lookup, "FLUME_HTTP_TIMEOUT_SECS", 30_u64)?,
            series: non_empty(&lookup, "FLUME_SERIES").unwrap_or_else(|| DEFAULT_SERIES.to_string()),
            log_file: non_empty(&lookup, "FLUME_LOG_FILE")
                .map(PathBuf::from)
                .or_else(|| home.map(default_log_path)),
        })
    }
}

fn default_log_path(home: &Path) -> PathBuf {
    home.join(".log").join("flume.log")
}

fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr + Copy,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::config(format!("{key} must be a valid number"))),
        None => Ok(default),
    }
}
