//! Retry loop shared by every facade verb.

use std::future::Future;
use std::sync::Arc;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    attempt::{run_with_timeout, AttemptOutcome},
    RetryConfig, RetryDbError, Result,
};

/// Drives up to `config.attempts` attempts of `work`.
///
/// Attempts run one after another; before every attempt but the first the
/// loop waits [`RetryConfig::delay_for`]. Each attempt is bounded by
/// `config.attempt_timeout` and the whole sequence, waits included, by
/// `config.deadline`.
///
/// Returns the first successful result, [`RetryDbError::AttemptsExhausted`]
/// when every attempt failed, or [`RetryDbError::DeadlineExceeded`] when the
/// deadline fired first. An invalid config fails before any attempt runs.
pub async fn retry<T, F, Fut>(config: &RetryConfig, operation: &str, mut work: F) -> Result<T>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    config.validate()?;

    let started = Instant::now();
    let deadline = sleep(config.deadline);
    tokio::pin!(deadline);

    let mut last_error: Option<RetryDbError> = None;

    for attempt in 0..config.attempts {
        if attempt > 0 {
            let delay = config.delay_for(attempt);
            tokio::select! {
                _ = &mut deadline => {
                    return Err(deadline_exceeded(config, operation, attempt, last_error, started));
                }
                _ = sleep(delay) => {}
            }
        }

        let outcome = tokio::select! {
            _ = &mut deadline => {
                return Err(deadline_exceeded(config, operation, attempt + 1, last_error, started));
            }
            outcome = run_with_timeout(&mut work, config.attempt_timeout) => outcome,
        };

        match outcome.into_result(config.attempt_timeout) {
            Ok(value) => {
                #[cfg(feature = "tracing")]
                if attempt > 0 {
                    tracing::debug!(
                        operation,
                        attempt = attempt + 1,
                        elapsed = ?started.elapsed(),
                        "succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    operation,
                    attempt = attempt + 1,
                    max_attempts = config.attempts,
                    error = %err,
                    "attempt failed"
                );
                last_error = Some(err);
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::warn!(
        operation,
        attempts = config.attempts,
        elapsed = ?started.elapsed(),
        "all retry attempts failed"
    );

    let Some(source) = last_error else {
        return Err(RetryDbError::InvalidConfiguration(
            "attempts must be at least 1".to_owned(),
        ));
    };
    Err(RetryDbError::AttemptsExhausted {
        attempts: config.attempts,
        source: Box::new(source),
    })
}

/// Retries `call` against a shared handle, failing fast when there is none.
///
/// The not-connected check runs before any task is spawned or timer armed.
pub(crate) async fn retry_on<H, T, F, Fut>(
    handle: Option<&Arc<H>>,
    config: &RetryConfig,
    operation: &str,
    call: F,
) -> Result<T>
where
    H: Send + Sync + 'static,
    F: Fn(Arc<H>, CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let handle = handle.cloned().ok_or(RetryDbError::NotConnected)?;
    retry(config, operation, |cancel| call(handle.clone(), cancel)).await
}

fn deadline_exceeded(
    config: &RetryConfig,
    operation: &str,
    attempts: u32,
    last_error: Option<RetryDbError>,
    started: Instant,
) -> RetryDbError {
    #[cfg(feature = "tracing")]
    tracing::warn!(
        operation,
        attempts,
        deadline = ?config.deadline,
        elapsed = ?started.elapsed(),
        "retry deadline exceeded"
    );
    #[cfg(not(feature = "tracing"))]
    let _ = (operation, started);

    RetryDbError::DeadlineExceeded {
        deadline: config.deadline,
        attempts,
        last: last_error.map(Box::new),
    }
}
