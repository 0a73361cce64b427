use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

use crate::domain::credentials::Credentials;
use crate::domain::reading::RawReading;
use crate::domain::retry::{Classified, FailureKind};
use crate::domain::window::QueryWindow;

pub const DEFAULT_API_BASE: &str = "https://api.flumetech.com";

const TOKEN_ENDPOINT: &str = "token endpoint";
const QUERY_ENDPOINT: &str = "query endpoint";
const DEVICES_ENDPOINT: &str = "devices endpoint";

pub trait FlumeApi {
    fn request_token(&self, credentials: &Credentials) -> Result<TokenGrant, FlumeApiError>;
    fn query_usage(
        &self,
        credentials: &Credentials,
        window: &QueryWindow,
    ) -> Result<Vec<RawReading>, FlumeApiError>;
    fn list_devices(&self, credentials: &Credentials) -> Result<Vec<Device>, FlumeApiError>;
}

#[derive(Debug, Error)]
pub enum FlumeApiError {
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
    },
    #[error("{endpoint} timed out: {source}")]
    Timeout {
        endpoint: &'static str,
        source: reqwest::Error,
    },
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: &'static str,
        source: reqwest::Error,
    },
    #[error("transport failure talking to {endpoint}: {source}")]
    Transport {
        endpoint: &'static str,
        source: reqwest::Error,
    },
    #[error("could not build request for {endpoint}: {source}")]
    Request {
        endpoint: &'static str,
        source: reqwest::Error,
    },
    #[error("unexpected response from {endpoint}: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },
}

impl FlumeApiError {
    pub fn response_body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    fn from_transport(endpoint: &'static str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { endpoint, source }
        } else if source.is_connect() {
            Self::Connect { endpoint, source }
        } else if source.is_builder() {
            Self::Request { endpoint, source }
        } else {
            Self::Transport { endpoint, source }
        }
    }
}

impl Classified for FlumeApiError {
    fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Status { status, .. } => FailureKind::from_status(*status),
            Self::Timeout { .. } => FailureKind::ConnectTimeout,
            Self::Connect { .. } | Self::Transport { .. } => FailureKind::Socket,
            Self::Request { .. } => FailureKind::InvalidRequest,
            Self::Decode { .. } => FailureKind::Decode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: u32,
    #[serde(default)]
    pub location_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    graph: Vec<RawReading>,
}

#[derive(Debug, Clone)]
pub struct FlumeHttpClient {
    client: Client,
    base_url: String,
}

impl FlumeHttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("flume_collector/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn send(&self, endpoint: &'static str, request: RequestBuilder) -> Result<String, FlumeApiError> {
        let response = request
            .send()
            .map_err(|error| FlumeApiError::from_transport(endpoint, error))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|error| FlumeApiError::from_transport(endpoint, error))?;

        tracing::debug!(endpoint, status = status.as_u16(), bytes = body.len(), "flume response received");

        if !status.is_success() {
            return Err(FlumeApiError::Status {
                endpoint,
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

impl FlumeApi for FlumeHttpClient {
    fn request_token(&self, credentials: &Credentials) -> Result<TokenGrant, FlumeApiError> {
        let form = [
            ("grant_type", "password"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
        ];
        let request = self
            .client
            .post(format!("{}/oauth/token", self.base_url))
            .form(&form);

        let body = self.send(TOKEN_ENDPOINT, request)?;
        first_element(TOKEN_ENDPOINT, &body)
    }

    fn query_usage(
        &self,
        credentials: &Credentials,
        window: &QueryWindow,
    ) -> Result<Vec<RawReading>, FlumeApiError> {
        let request = self
            .client
            .post(format!(
                "{}/users/{}/devices/{}/query",
                self.base_url, credentials.user_id, credentials.device_id
            ))
            .bearer_auth(&credentials.access_token)
            .json(&usage_query_body(window));

        let body = self.send(QUERY_ENDPOINT, request)?;
        let result: QueryResult = first_element(QUERY_ENDPOINT, &body)?;
        Ok(result.graph)
    }

    fn list_devices(&self, credentials: &Credentials) -> Result<Vec<Device>, FlumeApiError> {
        let request = self
            .client
            .get(format!("{}/users/{}/devices", self.base_url, credentials.user_id))
            .bearer_auth(&credentials.access_token);

        let body = self.send(DEVICES_ENDPOINT, request)?;
        decode::<DataEnvelope<Device>>(DEVICES_ENDPOINT, &body).map(|envelope| envelope.data)
    }
}

pub fn usage_query_body(window: &QueryWindow) -> Value {
    json!({
        "queries": [{
            "raw": false,
            "request_id": "graph",
            "group_multiplier": 1,
            "bucket": "MIN",
            "until_datetime": window.format_until(),
            "since_datetime": window.format_since(),
        }]
    })
}

fn first_element<T: DeserializeOwned>(endpoint: &'static str, body: &str) -> Result<T, FlumeApiError> {
    decode::<DataEnvelope<T>>(endpoint, body)?
        .data
        .into_iter()
        .next()
        .ok_or_else(|| FlumeApiError::Decode {
            endpoint,
            reason: "`data` array is empty".to_string(),
        })
}

fn decode<T: DeserializeOwned>(endpoint: &'static str, body: &str) -> Result<T, FlumeApiError> {
    serde_json::from_str(body).map_err(|error| FlumeApiError::Decode {
        endpoint,
        reason: error.to_string(),
    })
}
