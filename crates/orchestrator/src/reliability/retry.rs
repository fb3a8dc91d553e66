//! Retry policy implementation

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::ErrorCategory;

/// Configuration for workflow execution retries
///
/// Supports exponential backoff with jitter to avoid thundering herd.
///
/// # Example
///
/// ```
/// use workflow_orchestrator::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::exponential()
///     .with_max_attempts(5)
///     .with_base_delay(Duration::from_secs(1))
///     .with_max_delay(Duration::from_secs(60));
///
/// // After attempt 1 fails: ~1 second
/// // After attempt 2 fails: ~2 seconds
/// // After attempt 3 fails: ~4 seconds
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Delay after the first failed attempt
    #[serde(with = "crate::duration_millis")]
    pub base_delay: Duration,

    /// Maximum delay between attempts
    #[serde(with = "crate::duration_millis")]
    pub max_delay: Duration,

    /// Backoff multiplier (e.g., 2.0 for exponential)
    pub backoff_multiplier: f64,

    /// Jitter factor (0.0-1.0) added on top of the computed delay
    ///
    /// A value of 0.1 means up to +10%, still capped at `max_delay`.
    pub jitter: f64,

    /// Error categories that stop retrying immediately
    #[serde(default)]
    pub fail_fast: Vec<ErrorCategory>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential()
    }
}

impl RetryPolicy {
    /// Create an exponential backoff retry policy with sensible defaults
    ///
    /// - 3 max attempts
    /// - 1 second base delay
    /// - 30 second max delay
    /// - 2x backoff multiplier
    /// - 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: 0.1,
            fail_fast: vec![],
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            jitter: 0.0,
            fail_fast: vec![],
        }
    }

    /// Create a policy with fixed delays (no backoff)
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
            jitter: 0.0,
            fail_fast: vec![],
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the base delay
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    /// Set the jitter factor (0.0-1.0)
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Stop retrying as soon as an error of this category is seen
    pub fn with_fail_fast(mut self, category: ErrorCategory) -> Self {
        if !self.fail_fast.contains(&category) {
            self.fail_fast.push(category);
        }
        self
    }

    /// Delay before the next attempt, after attempt `attempt` (1-based) failed
    ///
    /// `min(base_delay * backoff_multiplier^(attempt-1), max_delay)`, plus jitter,
    /// never exceeding `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let capped = self.base_delay_for_attempt(attempt).as_secs_f64();
        let max = self.max_delay.as_secs_f64();

        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            let jitter_range = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(0.0..jitter_range);
            (capped + offset).min(max)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered.max(0.0))
    }

    /// Delay before the next attempt without jitter
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Check if an error category should be retried
    pub fn should_retry(&self, category: ErrorCategory) -> bool {
        !self.fail_fast.contains(&category)
    }

    /// Check if there are remaining attempts
    pub fn has_attempts_remaining(&self, current_attempt: u32) -> bool {
        current_attempt < self.max_attempts
    }
}
