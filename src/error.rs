use std::time::Duration;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum RetryDbError {
    /// The receiver was never connected, or has been closed.
    #[error("not connected: connect to the database before running statements")]
    NotConnected,
    /// Retry policy values that cannot drive a retry sequence.
    #[error("invalid retry configuration: {0}")]
    InvalidConfiguration(String),
    /// A datasource string the driver cannot open.
    #[error("invalid datasource: {0}")]
    InvalidDatasource(String),
    /// A single attempt ran longer than the per-attempt timeout.
    #[error("attempt timed out after {timeout:?}")]
    AttemptTimeout { timeout: Duration },
    /// Every configured attempt failed.
    #[error("retry attempts ({attempts}) exhausted; last error: {source}")]
    AttemptsExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Error of the final attempt.
        #[source]
        source: Box<RetryDbError>,
    },
    /// The retry sequence as a whole ran past its deadline.
    ///
    /// The attempt in flight when the deadline fired has been cancelled.
    #[error(
        "retry deadline of {deadline:?} exceeded after {attempts} attempt(s){}",
        last_error_suffix(.last)
    )]
    DeadlineExceeded {
        deadline: Duration,
        /// Attempts started before the deadline fired.
        attempts: u32,
        /// Error of the latest finished attempt, if any finished.
        #[source]
        last: Option<Box<RetryDbError>>,
    },
    /// The attempt task panicked or was aborted before producing a result.
    #[error("attempt aborted: {0}")]
    AttemptAborted(String),
    /// The driver observed cancellation of the attempt.
    #[error("operation cancelled")]
    Cancelled,
    /// A query expected at least one row and got none.
    #[error("query returned no rows")]
    NoRows,
    /// Network or request execution error from `reqwest`.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Non-success HTTP status code with raw response body.
    #[error("http error {status}: {body}")]
    Http { status: u16, body: String },
    /// SQL/pipeline error returned by the server.
    #[error("pipeline error at request {request_index}: {message}")]
    Pipeline {
        /// Index of the failing request in the pipeline payload.
        request_index: usize,
        /// Error message text from upstream API.
        message: String,
        /// Optional engine-specific error code.
        code: Option<String>,
    },
    /// Response decoding, protocol-shape validation, or row mapping error.
    #[error("decode error: {0}")]
    Decode(String),
    /// Error reported by a third-party [`Driver`](crate::Driver) implementation.
    #[error("driver error: {0}")]
    Driver(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
}

impl RetryDbError {
    /// Wraps an error from a custom driver.
    pub fn driver<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Driver(Box::new(err))
    }

    /// Returns `true` when the retry sequence gave up because every attempt failed.
    pub fn is_attempts_exhausted(&self) -> bool {
        matches!(self, Self::AttemptsExhausted { .. })
    }

    /// Returns `true` when the retry sequence gave up on its overall deadline.
    ///
    /// The statement may still have been applied by the server.
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// Returns the error of the last attempt carried by an aggregated error.
    pub fn last_error(&self) -> Option<&RetryDbError> {
        match self {
            Self::AttemptsExhausted { source, .. } => Some(source),
            Self::DeadlineExceeded { last, .. } => last.as_deref(),
            _ => None,
        }
    }
}

fn last_error_suffix(last: &Option<Box<RetryDbError>>) -> String {
    match last {
        Some(err) => format!("; last error: {err}"),
        None => String::new(),
    }
}
