//! Reliability patterns for workflow execution
//!
//! This module provides:
//! - [`ErrorHandler`] - Timeout, retry and circuit breaking around one execution
//! - [`RetryPolicy`] - Configurable retry with exponential backoff
//! - [`TimeoutPolicy`] - Per-attempt timeouts
//! - [`CircuitBreakerConfig`] - Circuit breaker configuration
//! - [`classify_message`] - Error categorization by message keywords

mod circuit_breaker;
mod classify;
mod handler;
mod retry;
mod timeout;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitBreakerSnapshot, CircuitState};
pub use classify::{classify_message, ErrorCategory, ErrorSeverity};
pub use handler::{
    ErrorContext, ErrorHandler, ErrorHandlerConfig, ErrorSummary, RetryError, WorkflowErrorStats,
};
pub use retry::RetryPolicy;
pub use timeout::TimeoutPolicy;
