use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;
use thiserror::Error;

use crate::adapters::flume_api::{Device, FlumeApi, FlumeApiError};
use crate::domain::credentials::Credentials;
use crate::domain::reading::RawReading;
use crate::domain::retry::{
    AUTH_RETRYABLE, Classified, FailureKind, QUERY_RETRYABLE, RetryPolicy, execute,
};
use crate::domain::window::QueryWindow;

/// Device type the upstream assigns to the meter sensor (as opposed to bridges).
pub const METER_DEVICE_TYPE: u32 = 2;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Api(#[from] FlumeApiError),
    #[error("token endpoint returned an empty access token")]
    EmptyToken,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("credential `{0}` is required before querying usage")]
    CredentialUnavailable(&'static str),
    #[error("usage query failed: {0}")]
    Api(#[from] FlumeApiError),
}

impl FetchError {
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::CredentialUnavailable(_) => None,
            Self::Api(error) => Some(error.failure_kind()),
        }
    }

    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::CredentialUnavailable(_) => None,
            Self::Api(error) => error.response_body(),
        }
    }
}

/// Runs a password grant and stores the issued tokens in `credentials`.
///
/// Nothing from the previous token is reused, so a revoked token never blocks
/// re-authentication. Persisting the updated record is left to the caller.
pub fn authenticate<A>(
    api: &A,
    policy: RetryPolicy,
    credentials: &mut Credentials,
) -> Result<(), AuthError>
where
    A: FlumeApi + ?Sized,
{
    let snapshot = credentials.clone();
    let grant = execute(policy, AUTH_RETRYABLE, |_| api.request_token(&snapshot))?;

    if grant.access_token.trim().is_empty() {
        return Err(AuthError::EmptyToken);
    }

    credentials.access_token = grant.access_token;
    credentials.refresh_token = grant.refresh_token;

    if credentials.user_id.is_empty()
        && let Some(user_id) = user_id_from_token(&credentials.access_token)
    {
        tracing::info!(user_id = %user_id, "user id taken from access token claims");
        credentials.user_id = user_id;
    }

    tracing::info!(user_id = %credentials.user_id, "authenticated against flume api");
    Ok(())
}

pub fn fetch_readings<A>(
    api: &A,
    policy: RetryPolicy,
    credentials: &Credentials,
    window: &QueryWindow,
) -> Result<Vec<RawReading>, FetchError>
where
    A: FlumeApi + ?Sized,
{
    require("access_token", &credentials.access_token)?;
    require("user_id", &credentials.user_id)?;
    require("device_id", &credentials.device_id)?;

    let readings = execute(policy, QUERY_RETRYABLE, |_| {
        api.query_usage(credentials, window)
    })?;

    tracing::info!(
        since = %window.format_since(),
        until = %window.format_until(),
        readings = readings.len(),
        "usage readings fetched"
    );
    Ok(readings)
}

pub fn list_devices<A>(
    api: &A,
    policy: RetryPolicy,
    credentials: &Credentials,
) -> Result<Vec<Device>, FetchError>
where
    A: FlumeApi + ?Sized,
{
    require("access_token", &credentials.access_token)?;
    require("user_id", &credentials.user_id)?;

    Ok(execute(policy, QUERY_RETRYABLE, |_| api.list_devices(credentials))?)
}

/// Picks the meter to query when the account has exactly one.
pub fn select_meter_device(devices: &[Device]) -> Option<&Device> {
    let mut meters = devices
        .iter()
        .filter(|device| device.device_type == METER_DEVICE_TYPE);
    match (meters.next(), meters.next()) {
        (Some(device), None) => Some(device),
        _ => None,
    }
}

fn require(name: &'static str, value: &str) -> Result<(), FetchError> {
    if value.trim().is_empty() {
        return Err(FetchError::CredentialUnavailable(name));
    }
    Ok(())
}

fn user_id_from_token(token: &str) -> Option<String> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;

    match claims.get("user_id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
