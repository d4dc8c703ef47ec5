use std::str::FromStr;
use std::time::Duration;

use crate::{backoff, RetryDbError, Result, Strategy};

/// Configures how connection attempts and statements are retried.
///
/// Copied into every prepared statement derived from a client, so a
/// statement keeps the policy of the client that prepared it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, first one included.
    pub attempts: u32,
    /// Growth of the wait between attempts.
    pub strategy: Strategy,
    /// Base wait between attempts.
    pub base_delay: Duration,
    /// Cap for the growing strategies.
    pub max_delay: Duration,
    /// Time allowed for a single attempt.
    pub attempt_timeout: Duration,
    /// Time allowed for the whole retry sequence.
    pub deadline: Duration,
    /// Base of the exponential strategy.
    pub exponential_factor: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            strategy: Strategy::Consistent,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            attempt_timeout: Duration::from_secs(2),
            deadline: Duration::from_secs(3),
            exponential_factor: 2,
        }
    }
}

impl RetryConfig {
    /// Single bounded attempt, no retry.
    pub fn no_retry() -> Self {
        Self::default().with_attempts(1)
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_exponential_factor(mut self, factor: u32) -> Self {
        self.exponential_factor = factor;
        self
    }

    /// Wait before the given retry attempt (`attempt >= 1`).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        backoff::delay(
            self.strategy,
            attempt,
            self.base_delay,
            self.max_delay,
            self.exponential_factor,
        )
    }

    /// Rejects policies that cannot drive a retry sequence.
    pub fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err(RetryDbError::InvalidConfiguration(
                "attempts must be at least 1".to_owned(),
            ));
        }
        if self.attempt_timeout.is_zero() {
            return Err(RetryDbError::InvalidConfiguration(
                "attempt_timeout must be greater than zero".to_owned(),
            ));
        }
        if self.deadline.is_zero() {
            return Err(RetryDbError::InvalidConfiguration(
                "deadline must be greater than zero".to_owned(),
            ));
        }
        if self.strategy == Strategy::Exponential && self.exponential_factor == 0 {
            return Err(RetryDbError::InvalidConfiguration(
                "exponential_factor must be at least 1 for the exponential strategy".to_owned(),
            ));
        }
        Ok(())
    }

    /// Builds a config from `RETRYDB_*` environment variables.
    ///
    /// Reads:
    /// - `RETRYDB_ATTEMPTS`
    /// - `RETRYDB_STRATEGY`: `consistent`, `exponential` or `incremental`
    /// - `RETRYDB_BASE_DELAY_MS`
    /// - `RETRYDB_MAX_DELAY_MS`
    /// - `RETRYDB_ATTEMPT_TIMEOUT_MS`
    /// - `RETRYDB_DEADLINE_MS`
    /// - `RETRYDB_EXPONENTIAL_FACTOR`
    ///
    /// Unset or empty variables keep their default. The result is validated.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(value) = get("RETRYDB_ATTEMPTS") {
            config.attempts = parse_number("RETRYDB_ATTEMPTS", &value)?;
        }
        if let Some(value) = get("RETRYDB_STRATEGY") {
            config.strategy = value.parse().unwrap_or(Strategy::Incremental);
        }
        if let Some(value) = get("RETRYDB_BASE_DELAY_MS") {
            config.base_delay = parse_millis("RETRYDB_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = get("RETRYDB_MAX_DELAY_MS") {
            config.max_delay = parse_millis("RETRYDB_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = get("RETRYDB_ATTEMPT_TIMEOUT_MS") {
            config.attempt_timeout = parse_millis("RETRYDB_ATTEMPT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = get("RETRYDB_DEADLINE_MS") {
            config.deadline = parse_millis("RETRYDB_DEADLINE_MS", &value)?;
        }
        if let Some(value) = get("RETRYDB_EXPONENTIAL_FACTOR") {
            config.exponential_factor = parse_number("RETRYDB_EXPONENTIAL_FACTOR", &value)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|err| {
        RetryDbError::InvalidConfiguration(format!("{key}='{value}' is not a valid number: {err}"))
    })
}

fn parse_millis(key: &str, value: &str) -> Result<Duration> {
    parse_number::<u64>(key, value).map(Duration::from_millis)
}
