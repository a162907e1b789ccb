//! Delay schedules between store retries.
//!
//! Attempt `0` is the initial call and never waits; retries start at attempt `1`.
//! Every schedule saturates at [`MAX_BACKOFF`].
//!
//! ```rust
//! use std::time::Duration;
//! use windowgate::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(50))
//!     .with_max(Duration::from_millis(300))
//!     .unwrap();
//! assert_eq!(backoff.delay(1), Duration::from_millis(50));
//! assert_eq!(backoff.delay(3), Duration::from_millis(200));
//! assert_eq!(backoff.delay(4), Duration::from_millis(300));
//! ```

use std::fmt;
use std::time::Duration;

/// Upper bound for any computed delay.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    ConstantDoesNotSupportMax,
    MaxLessThanBase { base: Duration, max: Duration },
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::ConstantDoesNotSupportMax => {
                write!(f, "with_max only applies to exponential backoff")
            }
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max ({:?}) must be >= base ({:?})", max, base)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Schedule {
    Constant(Duration),
    Exponential { base: Duration, max: Option<Duration> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    schedule: Schedule,
}

impl Backoff {
    pub fn constant(delay: Duration) -> Self {
        Self { schedule: Schedule::Constant(delay) }
    }

    /// `base * 2^(attempt - 1)`.
    pub fn exponential(base: Duration) -> Self {
        Self { schedule: Schedule::Exponential { base, max: None } }
    }

    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        match &mut self.schedule {
            Schedule::Constant(_) => Err(BackoffError::ConstantDoesNotSupportMax),
            Schedule::Exponential { base, max: existing } => {
                if max < *base {
                    return Err(BackoffError::MaxLessThanBase { base: *base, max });
                }
                *existing = Some(max);
                Ok(self)
            }
        }
    }

    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let raw = match &self.schedule {
            Schedule::Constant(delay) => *delay,
            Schedule::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(u32::MAX as usize) as u32;
                let nanos = base.as_nanos().saturating_mul(2u128.saturating_pow(exponent));
                let delay = Duration::from_nanos(nanos.min(MAX_BACKOFF.as_nanos()) as u64);
                max.map_or(delay, |m| delay.min(m))
            }
        };
        raw.min(MAX_BACKOFF)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_millis(50))
    }
}
