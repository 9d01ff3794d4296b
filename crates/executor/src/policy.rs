//! Retry policy: attempt budget and inter-attempt delay.

use rand::Rng;
use std::time::Duration;

/// Default attempt budget for store I/O.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 300;

/// Default delay between attempts in milliseconds.
pub const DEFAULT_DELAY_MS: u64 = 2000;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry
    Fixed,
    /// Delay doubles after every attempt, capped at `max_delay_ms`
    Exponential,
}

/// Configuration for retry behavior
///
/// The defaults (300 attempts, 2s fixed delay) give a store roughly ten
/// minutes to come back before an operation is reported as exhausted.
///
/// # Example
/// ```ignore
/// let policy = RetryPolicy::new()
///     .with_max_attempts(5)
///     .with_backoff(Backoff::Exponential)
///     .with_base_delay_ms(10)
///     .with_max_delay_ms(200);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (minimum 1)
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay between attempts in milliseconds
    pub max_delay_ms: u64,
    /// Delay growth
    pub backoff: Backoff,
    /// Randomize each delay into `[delay / 2, delay]`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_DELAY_MS,
            max_delay_ms: DEFAULT_DELAY_MS,
            backoff: Backoff::Fixed,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Create a new RetryPolicy with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed delay policy
    pub fn fixed(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms: delay_ms,
            max_delay_ms: delay_ms,
            backoff: Backoff::Fixed,
            jitter: false,
        }
    }

    /// Exponential backoff policy
    pub fn exponential(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            backoff: Backoff::Exponential,
            jitter: false,
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self::fixed(1, 0)
    }

    /// Small budget without waiting, for tests
    pub fn for_testing() -> Self {
        Self::fixed(3, 0)
    }

    /// Set the attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set base delay
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Set delay growth
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), RetryPolicyError> {
        if self.max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(RetryPolicyError::BaseExceedsMax);
        }
        Ok(())
    }

    /// Delay to wait after the given (zero-based) failed attempt, before jitter.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay_ms = match self.backoff {
            Backoff::Fixed => self.base_delay_ms,
            Backoff::Exponential => {
                // Cap the shift to prevent overflow
                let shift = attempt.min(63);
                self.base_delay_ms.saturating_mul(1u64 << shift)
            }
        };
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Delay to actually sleep after the given failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.calculate_delay(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let millis = delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(millis / 2..=millis))
    }
}

/// Retry policy configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryPolicyError {
    /// At least one attempt is required.
    #[error("max_attempts must be at least 1")]
    ZeroAttempts,

    /// Base delay above the cap.
    #[error("base delay cannot exceed max delay")]
    BaseExceedsMax,
}
