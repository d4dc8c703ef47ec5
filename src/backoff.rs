//! Delay between two attempts of a retry sequence.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How the wait before the next attempt grows.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Always wait `base_delay`.
    #[default]
    Consistent,
    /// Wait `base_delay * factor^attempt`, capped at `max_delay`.
    Exponential,
    /// Wait `attempt * base_delay`, capped at `max_delay`.
    Incremental,
}

impl Strategy {
    fn as_str(self) -> &'static str {
        match self {
            Self::Consistent => "consistent",
            Self::Exponential => "exponential",
            Self::Incremental => "incremental",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a strategy name case-insensitively.
///
/// Unknown names fall back to [`Strategy::Incremental`], so parsing never fails.
impl FromStr for Strategy {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let strategy = match value.trim().to_ascii_lowercase().as_str() {
            "consistent" | "constant" | "fixed" => Self::Consistent,
            "exponential" => Self::Exponential,
            _ => Self::Incremental,
        };
        Ok(strategy)
    }
}

/// Computes the wait before attempt `attempt` (1-based retry index).
///
/// Arithmetic runs in `f64` nanoseconds and is truncated back to whole
/// nanoseconds; results saturate at `u64::MAX` nanoseconds.
pub fn delay(
    strategy: Strategy,
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    factor: u32,
) -> Duration {
    let base = base_delay.as_nanos() as f64;
    let cap = max_delay.as_nanos() as f64;

    let nanos = match strategy {
        Strategy::Consistent => return base_delay,
        Strategy::Exponential if base == 0.0 => 0.0,
        Strategy::Exponential => cap.min(base * f64::from(factor).powf(f64::from(attempt))),
        Strategy::Incremental => cap.min(f64::from(attempt) * base),
    };

    // `as` saturates and maps NaN to zero.
    Duration::from_nanos(nanos.max(0.0) as u64)
}
