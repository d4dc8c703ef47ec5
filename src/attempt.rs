//! One bounded attempt: the work runs as its own task and races a timer.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{RetryDbError, Result};

/// Result of a single attempt, consumed by the retry loop.
#[derive(Debug)]
pub enum AttemptOutcome<T> {
    Success(T),
    Failure(RetryDbError),
    TimedOut,
}

impl<T> AttemptOutcome<T> {
    /// Converts the outcome into a result, recording a timeout as
    /// [`RetryDbError::AttemptTimeout`].
    pub fn into_result(self, timeout: Duration) -> Result<T> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(err) => Err(err),
            Self::TimedOut => Err(RetryDbError::AttemptTimeout { timeout }),
        }
    }
}

/// Cancels the token and aborts the task when dropped.
///
/// Dropping the attempt future (timer won, or the caller stopped waiting)
/// therefore stops the work instead of leaving it running.
struct AttemptGuard<T> {
    handle: JoinHandle<Result<T>>,
    cancel: CancellationToken,
}

impl<T> Drop for AttemptGuard<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Runs `work` as a separate task, bounded by `timeout`.
///
/// `work` receives a [`CancellationToken`] that fires as soon as the attempt
/// is abandoned; drivers pass it down to the underlying call.
pub async fn run_with_timeout<T, F, Fut>(work: F, timeout: Duration) -> AttemptOutcome<T>
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let cancel = CancellationToken::new();
    let mut guard = AttemptGuard {
        handle: tokio::spawn(work(cancel.clone())),
        cancel,
    };

    tokio::select! {
        joined = &mut guard.handle => match joined {
            Ok(Ok(value)) => AttemptOutcome::Success(value),
            Ok(Err(err)) => AttemptOutcome::Failure(err),
            Err(err) => AttemptOutcome::Failure(RetryDbError::AttemptAborted(err.to_string())),
        },
        _ = tokio::time::sleep(timeout) => AttemptOutcome::TimedOut,
    }
}
