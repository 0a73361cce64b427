use std::fmt;

pub const DEFAULT_MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    BadGateway,
    GatewayTimeout,
    InternalServerError,
    ConnectTimeout,
    Socket,
    BadRequest,
    Unauthorized,
    UnexpectedStatus,
    InvalidRequest,
    Decode,
}

impl FailureKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            500 => Self::InternalServerError,
            502 => Self::BadGateway,
            504 => Self::GatewayTimeout,
            _ => Self::UnexpectedStatus,
        }
    }

    /// The upstream refused the request itself; repeating it cannot succeed.
    pub fn is_rejection(self) -> bool {
        matches!(self, Self::BadRequest | Self::Unauthorized)
    }

    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::BadGateway
                | Self::GatewayTimeout
                | Self::InternalServerError
                | Self::ConnectTimeout
                | Self::Socket
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadGateway => "bad_gateway",
            Self::GatewayTimeout => "gateway_timeout",
            Self::InternalServerError => "internal_server_error",
            Self::ConnectTimeout => "connect_timeout",
            Self::Socket => "socket",
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::UnexpectedStatus => "unexpected_status",
            Self::InvalidRequest => "invalid_request",
            Self::Decode => "decode",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const AUTH_RETRYABLE: &[FailureKind] = &[
    FailureKind::BadGateway,
    FailureKind::GatewayTimeout,
    FailureKind::ConnectTimeout,
    FailureKind::Socket,
];

pub const QUERY_RETRYABLE: &[FailureKind] = &[
    FailureKind::BadGateway,
    FailureKind::GatewayTimeout,
    FailureKind::InternalServerError,
    FailureKind::ConnectTimeout,
    FailureKind::Socket,
];

/// Errors that can be matched against a retryable set.
pub trait Classified {
    fn failure_kind(&self) -> FailureKind;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Runs `operation` until it succeeds, fails with a kind outside `retryable`,
/// or has been retried `policy.max_retries` times. Retries are immediate.
///
/// The error handed back is always the one the last attempt produced.
pub fn execute<T, E, F>(policy: RetryPolicy, retryable: &[FailureKind], mut operation: F) -> Result<T, E>
where
    E: Classified + fmt::Display,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation(attempt) {
            Ok(value) => return Ok(value),
            Err(error) => {
                let kind = error.failure_kind();
                if !retryable.contains(&kind) || attempt >= policy.max_retries {
                    return Err(error);
                }
                attempt += 1;
                tracing::info!(
                    kind = %kind,
                    attempt,
                    max_retries = policy.max_retries,
                    error = %error,
                    "retrying after transient failure"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use thiserror::Error;
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    use super::{AUTH_RETRYABLE, Classified, FailureKind, QUERY_RETRYABLE, RetryPolicy, execute};

    #[derive(Debug, Error, PartialEq)]
    #[error("fake failure {kind} #{serial}")]
    struct FakeError {
        kind: FailureKind,
        serial: u32,
    }

    impl Classified for FakeError {
        fn failure_kind(&self) -> FailureKind {
            self.kind
        }
    }

    struct InfoCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for InfoCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::INFO {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn failing_n_times(
        failures: u32,
        kind: FailureKind,
        calls: &Cell<u32>,
    ) -> impl FnMut(u32) -> Result<&'static str, FakeError> + '_ {
        move |attempt| {
            assert_eq!(attempt, calls.get(), "attempt number follows call count");
            calls.set(calls.get() + 1);
            if attempt < failures {
                Err(FakeError {
                    kind,
                    serial: attempt,
                })
            } else {
                Ok("done")
            }
        }
    }

    #[test]
    fn succeeds_after_exactly_max_retries_failures_and_logs_each_retry() {
        for max_retries in 0..=5 {
            let logged = Arc::new(AtomicUsize::new(0));
            let subscriber = tracing_subscriber::registry().with(InfoCounter(Arc::clone(&logged)));
            let calls = Cell::new(0);

            let result = tracing::subscriber::with_default(subscriber, || {
                execute(
                    RetryPolicy::new(max_retries),
                    QUERY_RETRYABLE,
                    failing_n_times(max_retries, FailureKind::BadGateway, &calls),
                )
            });

            assert_eq!(result, Ok("done"));
            assert_eq!(calls.get(), max_retries + 1);
            assert_eq!(logged.load(Ordering::SeqCst), max_retries as usize);
        }
    }

    #[test]
    fn returns_last_original_error_when_budget_is_exhausted() {
        let calls = Cell::new(0);
        let result = execute(
            RetryPolicy::new(3),
            QUERY_RETRYABLE,
            failing_n_times(4, FailureKind::GatewayTimeout, &calls),
        );

        assert_eq!(
            result,
            Err(FakeError {
                kind: FailureKind::GatewayTimeout,
                serial: 3,
            })
        );
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn never_retries_non_retryable_failures() {
        for kind in [FailureKind::Unauthorized, FailureKind::BadRequest, FailureKind::Decode] {
            let calls = Cell::new(0);
            let result = execute(RetryPolicy::new(5), QUERY_RETRYABLE, failing_n_times(10, kind, &calls));

            assert_eq!(result, Err(FakeError { kind, serial: 0 }));
            assert_eq!(calls.get(), 1);
        }
    }

    #[test]
    fn auth_set_does_not_retry_internal_server_error() {
        let calls = Cell::new(0);
        let result = execute(
            RetryPolicy::default(),
            AUTH_RETRYABLE,
            failing_n_times(1, FailureKind::InternalServerError, &calls),
        );

        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn maps_status_codes_to_kinds() {
        assert_eq!(FailureKind::from_status(400), FailureKind::BadRequest);
        assert_eq!(FailureKind::from_status(401), FailureKind::Unauthorized);
        assert_eq!(FailureKind::from_status(500), FailureKind::InternalServerError);
        assert_eq!(FailureKind::from_status(502), FailureKind::BadGateway);
        assert_eq!(FailureKind::from_status(504), FailureKind::GatewayTimeout);
        assert_eq!(FailureKind::from_status(418), FailureKind::UnexpectedStatus);
        assert!(FailureKind::Unauthorized.is_rejection());
        assert!(!FailureKind::Socket.is_rejection());
        assert_eq!(RetryPolicy::default().max_retries, 5);
    }
}
