//! Exponential backoff between retry attempts.

use std::time::Duration;

use crate::error::ConfigError;

/// Default lower bound between attempts.
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_millis(10);
/// Default upper bound between attempts.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60 * 60);
/// Default growth factor per failed attempt.
pub const DEFAULT_FACTOR: u32 = 2;

/// Maps a failed-attempt count to a wait duration.
///
/// `delay(n) = min * factor^n`, clamped to `max`. Overflow saturates at `max`,
/// so the sequence is non-decreasing and reaches `max` in a bounded number of
/// steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    min: Duration,
    max: Duration,
    factor: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_DELAY,
            max: DEFAULT_MAX_DELAY,
            factor: DEFAULT_FACTOR,
        }
    }
}

impl BackoffPolicy {
    /// Create a doubling policy bounded by `min` and `max`.
    pub fn new(min: Duration, max: Duration) -> Result<Self, ConfigError> {
        Self::with_factor(min, max, DEFAULT_FACTOR)
    }

    /// Create a policy with a custom growth factor.
    pub fn with_factor(min: Duration, max: Duration, factor: u32) -> Result<Self, ConfigError> {
        if min.is_zero() {
            return Err(ConfigError::ZeroMinimum);
        }
        if min > max {
            return Err(ConfigError::MinimumAboveMaximum { min, max });
        }
        if factor < 2 {
            return Err(ConfigError::FactorTooSmall(factor));
        }
        Ok(Self { min, max, factor })
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }

    /// Wait time before the retry that follows `attempt` consecutive failures.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self.factor.checked_pow(attempt) {
            Some(multiplier) => self.min.saturating_mul(multiplier).min(self.max),
            None => self.max,
        }
    }

    /// Smallest attempt count whose delay equals `max`.
    pub fn attempts_to_max(&self) -> u32 {
        let mut attempt = 0;
        while self.delay(attempt) < self.max {
            attempt += 1;
        }
        attempt
    }
}
