//! Per-workflow circuit breaker

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,

    /// Failure threshold reached - calls rejected until the recovery timeout elapses
    Open,

    /// Recovery timeout elapsed - the next call is let through as a probe
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration
///
/// When consecutive failed executions of a workflow reach the threshold, the
/// circuit "opens" and further executions fail fast without invoking the
/// operation.
///
/// # State Machine
///
/// ```text
/// ┌─────────┐  failure threshold  ┌─────────┐ recovery timeout ┌──────────┐
/// │ Closed  │ ─────────────────► │  Open   │ ───────────────► │ HalfOpen │
/// └─────────┘                     └─────────┘                  └──────────┘
///      ▲                               ▲          failure           │
///      │                               └────────────────────────────┤
///      │                    success                                 │
///      └────────────────────────────────────────────────────────────┘
/// ```
///
/// # Example
///
/// ```
/// use workflow_orchestrator::CircuitBreakerConfig;
/// use std::time::Duration;
///
/// let config = CircuitBreakerConfig::default()
///     .with_failure_threshold(5)
///     .with_recovery_timeout(Duration::from_secs(30));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures required to open the circuit
    pub failure_threshold: u32,

    /// Time to wait before letting a probe call through an open circuit
    #[serde(with = "crate::duration_millis")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new circuit breaker configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold to open the circuit
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Set the recovery timeout (time before trying again after opening)
    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }
}

/// Point-in-time view of a breaker, safe to hand to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub workflow_id: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Breaker state for a single workflow id
#[derive(Debug, Clone)]
pub(crate) struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    opened_at: Option<Instant>,
    last_touched: Instant,
}

impl CircuitBreaker {
    pub(crate) fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            opened_at: None,
            last_touched: Instant::now(),
        }
    }

    pub(crate) fn state(&self) -> CircuitState {
        self.state
    }

    pub(crate) fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_touched.elapsed()
    }

    /// Ask permission for a call.
    ///
    /// Returns the remaining cool-down when the circuit is open.
    pub(crate) fn try_acquire(&mut self, config: &CircuitBreakerConfig) -> Result<(), Duration> {
        self.last_touched = Instant::now();
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = self.opened_at.map(|at| at.elapsed()).unwrap_or(Duration::MAX);
                if elapsed >= config.recovery_timeout {
                    tracing::info!(
                        recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
                        "Circuit breaker transitioning to HALF_OPEN"
                    );
                    self.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(config.recovery_timeout - elapsed)
                }
            }
        }
    }

    pub(crate) fn record_success(&mut self) {
        self.last_touched = Instant::now();
        if self.state != CircuitState::Closed {
            tracing::info!(previous = %self.state, "Circuit breaker closing after successful call");
        }
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.opened_at = None;
    }

    pub(crate) fn record_failure(&mut self, config: &CircuitBreakerConfig) {
        let now = Instant::now();
        self.last_touched = now;
        self.last_failure_at = Some(Utc::now());
        self.failure_count = self.failure_count.saturating_add(1);

        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
            }
            CircuitState::Closed if self.failure_count >= config.failure_threshold => {
                self.state = CircuitState::Open;
                self.opened_at = Some(now);
            }
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    pub(crate) fn snapshot(&self, workflow_id: &str) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            workflow_id: workflow_id.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            last_failure_at: self.last_failure_at,
        }
    }
}
