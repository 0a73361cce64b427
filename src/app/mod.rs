mod config;
mod error;
mod lock;
mod logging;
pub mod runtime;
pub mod session;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use serde_json::Value;

pub use error::AppError;

use crate::adapters::credentials_file::{CredentialStore, YamlCredentialFile};
use crate::adapters::db::{SqlitePointSink, count_points, schema_version};
use crate::adapters::flume_api::{Device, FlumeHttpClient};
use crate::domain::reading::PointConverter;
use crate::domain::retry::RetryPolicy;
use config::AppConfig;
use lock::RunLock;
use runtime::{IngestionRun, RunOutcome, RunSettings, SystemClock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Authenticate,
    ShowDevices,
    RecordStatus { offset_hours: u32, dry_run: bool },
    InitStore,
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub command: Command,
    pub verbose: bool,
    pub log_file: Option<PathBuf>,
    pub log_to_stderr: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Succeeded,
    IngestionFailed,
}

pub fn run(invocation: Invocation) -> Result<Completion, AppError> {
    let mut config = AppConfig::from_env()?;
    if invocation.log_to_stderr {
        config.log_file = None;
    } else if invocation.log_file.is_some() {
        config.log_file = invocation.log_file;
    }

    logging::init(invocation.verbose, config.log_file.as_deref())?;

    tracing::info!(
        command = ?invocation.command,
        api_base = %config.api_base,
        credentials_path = %config.credentials_path.display(),
        db_path = %config.db_path,
        lookback_hours = config.lookback_hours,
        max_retries = config.max_retries,
        "starting"
    );

    let result = match invocation.command {
        Command::Authenticate => run_authenticate(&config).map(|()| Completion::Succeeded),
        Command::ShowDevices => run_show_devices(&config).map(|()| Completion::Succeeded),
        Command::RecordStatus {
            offset_hours,
            dry_run,
        } => run_record_status(&config, offset_hours, dry_run),
        Command::InitStore => run_init_store(&config).map(|()| Completion::Succeeded),
    };

    // stderr already gets the message from main
    if let (Err(error), Some(path)) = (&result, &config.log_file) {
        tracing::error!(error = %error, log_file = %path.display(), "run aborted");
    }

    result
}

fn run_authenticate(config: &AppConfig) -> Result<(), AppError> {
    let _lock = acquire_lock(config)?;
    let store = YamlCredentialFile::new(&config.credentials_path);
    let api = http_client(config)?;

    let mut credentials = store.load()?;
    session::authenticate(&api, retry_policy(config), &mut credentials)?;
    store.save(&credentials)?;

    println!("authenticated; tokens saved to {}", store.path().display());
    Ok(())
}

fn run_show_devices(config: &AppConfig) -> Result<(), AppError> {
    let _lock = acquire_lock(config)?;
    let store = YamlCredentialFile::new(&config.credentials_path);
    let api = http_client(config)?;
    let policy = retry_policy(config);

    let mut credentials = store.load()?;
    session::authenticate(&api, policy, &mut credentials)?;
    store.save(&credentials)?;

    let devices = session::list_devices(&api, policy, &credentials)?;
    for device in &devices {
        println!("{}", describe_device(device));
    }

    if credentials.device_id.is_empty()
        && let Some(meter) = session::select_meter_device(&devices)
    {
        tracing::info!(device_id = %meter.id, "selected the only meter device");
        credentials.device_id = meter.id.clone();
        store.save(&credentials)?;
        println!("device_id set to {}", meter.id);
    }

    Ok(())
}

fn run_record_status(
    config: &AppConfig,
    offset_hours: u32,
    dry_run: bool,
) -> Result<Completion, AppError> {
    let _lock = acquire_lock(config)?;
    let sink = open_point_store(config)?;

    let mut run = IngestionRun::new(
        http_client(config)?,
        sink,
        YamlCredentialFile::new(&config.credentials_path),
        SystemClock,
        PointConverter::new(config.series.clone(), Local),
        RunSettings {
            retry: retry_policy(config),
            lookback_hours: config.lookback_hours,
        },
    );

    let outcome = run.run_once(offset_hours, dry_run)?;
    tracing::info!(outcome = ?outcome, "run finished");

    Ok(completion_for(&outcome))
}

fn run_init_store(config: &AppConfig) -> Result<(), AppError> {
    let sink = open_point_store(config)?;
    let version = schema_version(sink.connection()).map_err(AppError::database_init)?;
    let points = count_points(sink.connection()).map_err(AppError::database_init)?;

    println!("created/updated point store at: {}", config.db_path);
    println!("schema version: {version}");
    println!("stored points: {points}");
    Ok(())
}

fn open_point_store(config: &AppConfig) -> Result<SqlitePointSink, AppError> {
    if let Some(parent) = Path::new(&config.db_path).parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(AppError::database_init)?;
    }

    SqlitePointSink::open(&config.db_path).map_err(AppError::database_init)
}

fn acquire_lock(config: &AppConfig) -> Result<RunLock, AppError> {
    Ok(RunLock::acquire(
        &config.lock_path,
        Duration::from_secs(config.lock_stale_secs),
    )?)
}

fn http_client(config: &AppConfig) -> Result<FlumeHttpClient, AppError> {
    FlumeHttpClient::new(
        &config.api_base,
        Duration::from_secs(config.http_timeout_secs),
    )
    .map_err(AppError::runtime)
}

fn retry_policy(config: &AppConfig) -> RetryPolicy {
    RetryPolicy::new(config.max_retries)
}

fn completion_for(outcome: &RunOutcome) -> Completion {
    if outcome.is_success() {
        Completion::Succeeded
    } else {
        Completion::IngestionFailed
    }
}

fn describe_device(device: &Device) -> String {
    let location = match &device.location_id {
        Some(Value::String(location)) => location.clone(),
        Some(other) => other.to_string(),
        None => "-".to_string(),
    };
    format!(
        "{}\ttype={}\tlocation={}",
        device.id, device.device_type, location
    )
}
