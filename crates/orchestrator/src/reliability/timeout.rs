//! Per-attempt timeout management
//!
//! Each execution attempt is bounded by a timeout that grows with the
//! attempt number and is capped at `max_timeout`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeout configuration for execution attempts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutPolicy {
    /// Timeout of the first attempt
    #[serde(with = "crate::duration_millis")]
    pub default_timeout: Duration,

    /// Growth factor applied per additional attempt
    pub timeout_multiplier: f64,

    /// Upper bound for any single attempt
    #[serde(with = "crate::duration_millis")]
    pub max_timeout: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            timeout_multiplier: 1.5,
            max_timeout: Duration::from_secs(300),
        }
    }
}

impl TimeoutPolicy {
    /// Create a new timeout policy
    pub fn new() -> Self {
        Self::default()
    }

    /// Same timeout for every attempt
    pub fn fixed(timeout: Duration) -> Self {
        Self {
            default_timeout: timeout,
            timeout_multiplier: 1.0,
            max_timeout: timeout,
        }
    }

    /// Set the first-attempt timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Set the per-attempt growth factor
    pub fn with_timeout_multiplier(mut self, multiplier: f64) -> Self {
        self.timeout_multiplier = multiplier.max(1.0);
        self
    }

    /// Set the upper bound
    pub fn with_max_timeout(mut self, timeout: Duration) -> Self {
        self.max_timeout = timeout;
        self
    }

    /// Timeout for attempt `attempt` (1-based)
    ///
    /// `min(default_timeout * timeout_multiplier^(attempt-1), max_timeout)`
    pub fn timeout_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.default_timeout.as_secs_f64() * self.timeout_multiplier.powi(exponent);
        let capped = raw.min(self.max_timeout.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_policy_defaults() {
        let policy = TimeoutPolicy::default();
        assert_eq!(policy.default_timeout, Duration::from_secs(30));
        assert_eq!(policy.timeout_multiplier, 1.5);
        assert_eq!(policy.max_timeout, Duration::from_secs(300));
    }

    #[test]
    fn test_timeout_grows_per_attempt() {
        let policy = TimeoutPolicy::new()
            .with_default_timeout(Duration::from_secs(10))
            .with_timeout_multiplier(2.0)
            .with_max_timeout(Duration::from_secs(100));

        assert_eq!(policy.timeout_for_attempt(1), Duration::from_secs(10));
        assert_eq!(policy.timeout_for_attempt(2), Duration::from_secs(20));
        assert_eq!(policy.timeout_for_attempt(3), Duration::from_secs(40));
        assert_eq!(policy.timeout_for_attempt(4), Duration::from_secs(80));
        assert_eq!(policy.timeout_for_attempt(5), Duration::from_secs(100));
    }

    #[test]
    fn test_timeout_never_exceeds_max() {
        let policy = TimeoutPolicy::default();
        for attempt in 1..64 {
            assert!(policy.timeout_for_attempt(attempt) <= policy.max_timeout);
        }
        assert_eq!(policy.timeout_for_attempt(u32::MAX), policy.max_timeout);
    }

    #[test]
    fn test_fixed_timeout() {
        let policy = TimeoutPolicy::fixed(Duration::from_millis(250));
        assert_eq!(policy.timeout_for_attempt(1), Duration::from_millis(250));
        assert_eq!(policy.timeout_for_attempt(7), Duration::from_millis(250));
    }

    #[test]
    fn test_timeout_policy_serialization() {
        let policy = TimeoutPolicy::fixed(Duration::from_secs(3));
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("3000"));
        let parsed: TimeoutPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
