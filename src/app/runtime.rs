use std::fmt;

use chrono::{DateTime, Local, TimeZone};
use thiserror::Error;
use uuid::Uuid;

use crate::adapters::credentials_file::{CredentialStore, CredentialStoreError};
use crate::adapters::db::{DbError, PointSink};
use crate::adapters::flume_api::FlumeApi;
use crate::app::session::{self, AuthError, FetchError};
use crate::domain::reading::{PointConverter, ReadingError};
use crate::domain::retry::{FailureKind, RetryPolicy};
use crate::domain::window::{WindowError, build_window};

pub trait Clock<Tz: TimeZone> {
    fn now(&self) -> DateTime<Tz>;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock<Local> for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// Errors that end a run before ingestion starts. These are fatal.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("credential store failed: {0}")]
    Credentials(#[from] CredentialStoreError),
    #[error("credential `{0}` is not set; run show-devices or edit the credential file")]
    CredentialUnavailable(&'static str),
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("invalid query window: {0}")]
    Window(#[from] WindowError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Fetch,
    Convert,
    Write,
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Convert => "convert",
            Self::Write => "write",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Written { points: usize },
    DryRun { points: usize },
    Failed {
        stage: IngestStage,
        kind: Option<FailureKind>,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

#[derive(Debug, Error)]
enum IngestFailure {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading failed data integrity check: {0}")]
    Convert(#[from] ReadingError),
    #[error("point write failed: {0}")]
    Write(#[from] DbError),
}

#[derive(Debug, Clone, Copy)]
pub struct RunSettings {
    pub retry: RetryPolicy,
    pub lookback_hours: u32,
}

pub struct IngestionRun<A, K, S, Cl, Tz: TimeZone> {
    api: A,
    sink: K,
    store: S,
    clock: Cl,
    converter: PointConverter<Tz>,
    settings: RunSettings,
}

impl<A, K, S, Cl, Tz> IngestionRun<A, K, S, Cl, Tz>
where
    A: FlumeApi,
    K: PointSink,
    S: CredentialStore,
    Cl: Clock<Tz>,
    Tz: TimeZone,
{
    pub fn new(
        api: A,
        sink: K,
        store: S,
        clock: Cl,
        converter: PointConverter<Tz>,
        settings: RunSettings,
    ) -> Self {
        Self {
            api,
            sink,
            store,
            clock,
            converter,
            settings,
        }
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Authenticates, persists the fresh tokens, then ingests one window.
    ///
    /// Failures before the window is built are returned as errors. Failures
    /// while fetching, converting or writing are logged and reported through
    /// `RunOutcome::Failed` so the scheduler keeps going.
    pub fn run_once(&mut self, offset_hours: u32, dry_run: bool) -> Result<RunOutcome, RunError> {
        let span = tracing::info_span!("ingestion_run", run_id = %Uuid::new_v4(), offset_hours, dry_run);
        let _entered = span.enter();

        let mut credentials = self.store.load()?;
        if credentials.device_id.trim().is_empty() {
            return Err(RunError::CredentialUnavailable("device_id"));
        }
        session::authenticate(&self.api, self.settings.retry, &mut credentials)?;
        self.store.save(&credentials)?;

        let window = build_window(self.clock.now(), offset_hours, self.settings.lookback_hours)?;
        tracing::debug!(
            since = %window.format_since(),
            until = %window.format_until(),
            "query window built"
        );

        let readings = match session::fetch_readings(
            &self.api,
            self.settings.retry,
            &credentials,
            &window,
        ) {
            Ok(readings) => readings,
            Err(error) => return Ok(self.fail(IngestStage::Fetch, error.into())),
        };

        let points = match self.converter.convert_all(&readings) {
            Ok(points) => points,
            Err(error) => return Ok(self.fail(IngestStage::Convert, error.into())),
        };

        if dry_run {
            for point in &points {
                tracing::debug!(
                    series = %point.series,
                    timestamp = point.timestamp,
                    value = point.value,
                    "dry run point"
                );
            }
            tracing::info!(points = points.len(), "dry run, skipping write");
            return Ok(RunOutcome::DryRun {
                points: points.len(),
            });
        }

        match self.sink.write(&points) {
            Ok(written) => {
                tracing::info!(points = written, series = %self.converter.series(), "points written");
                Ok(RunOutcome::Written { points: written })
            }
            Err(error) => Ok(self.fail(IngestStage::Write, error.into())),
        }
    }

    fn fail(&self, stage: IngestStage, failure: IngestFailure) -> RunOutcome {
        let (kind, body) = match &failure {
            IngestFailure::Fetch(error) => (error.failure_kind(), error.response_body()),
            _ => (None, None),
        };

        match kind {
            Some(kind) if kind.is_rejection() => tracing::error!(
                stage = %stage,
                kind = %kind,
                body = body.unwrap_or_default(),
                "request rejected by flume api"
            ),
            Some(kind) if kind.is_transient() => tracing::error!(
                stage = %stage,
                kind = %kind,
                max_retries = self.settings.retry.max_retries,
                error = %failure,
                "retries exhausted"
            ),
            _ => tracing::error!(stage = %stage, error = %failure, "ingestion failed"),
        }

        RunOutcome::Failed { stage, kind }
    }
}
