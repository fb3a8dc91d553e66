//! Error handler: timeout, retry and circuit breaking around workflow executions

use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot};
use super::classify::{classify_message, ErrorCategory, ErrorSeverity};
use super::retry::RetryPolicy;
use super::timeout::TimeoutPolicy;
use super::CircuitState;

/// Configuration for the error handler
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorHandlerConfig {
    /// Default retry policy
    pub retry: RetryPolicy,

    /// Default per-attempt timeouts
    pub timeout: TimeoutPolicy,

    /// Circuit breaker settings shared by every workflow id
    pub circuit_breaker: CircuitBreakerConfig,

    /// Error stats and closed breakers untouched for this long are evicted
    #[serde(with = "crate::duration_millis")]
    pub stats_ttl: Duration,
}

impl Default for ErrorHandlerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout: TimeoutPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            stats_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl ErrorHandlerConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn with_stats_ttl(mut self, ttl: Duration) -> Self {
        self.stats_ttl = ttl;
        self
    }
}

/// Context describing the execution being protected
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ErrorContext {
    /// Workflow id; also the circuit breaker key
    pub workflow_id: String,

    pub version: String,

    /// Attempt number of the last attempt made (1-based, 0 before the first)
    pub attempt: u32,

    /// Attempt budget; 0 means "use the policy's max_attempts"
    pub max_attempts: u32,

    /// Category override; when unset errors are classified by message
    pub category: Option<ErrorCategory>,

    /// Severity override; when unset it is derived from the category
    pub severity: Option<ErrorSeverity>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ErrorContext {
    pub fn new(workflow_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_category(mut self, category: ErrorCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Failure surfaced by [`ErrorHandler::execute_with_retry`]
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The workflow's circuit is open; the operation was not invoked
    #[error("circuit breaker is OPEN for workflow {workflow_id} (retry in {retry_after:?})")]
    CircuitOpen {
        workflow_id: String,
        retry_after: Duration,
    },

    /// The last attempt did not finish within its timeout
    #[error("attempt {attempt} timed out after {limit:?}")]
    TimedOut { attempt: u32, limit: Duration },

    /// The operation's own error from the last attempt, unmodified
    #[error("{0}")]
    Operation(E),
}

impl<E> RetryError<E> {
    /// The operation's error, if that is what ended the call
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// Accumulated error statistics for one workflow id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowErrorStats {
    pub workflow_id: String,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub count: u64,
    pub last_occurrence: DateTime<Utc>,
    pub last_message: String,
    pub last_stack: Option<String>,
}

/// Aggregate view over every tracked workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub total_errors: u64,
    pub workflows_with_errors: usize,
    pub by_category: HashMap<ErrorCategory, u64>,
    pub open_circuits: usize,
    pub half_open_circuits: usize,
}

/// Wraps asynchronous operations with timeout, exponential-backoff retry and
/// a per-workflow circuit breaker.
///
/// Breakers are checked once per call and charged one failure per call that
/// exhausts its attempts.
///
/// # Example
///
/// ```ignore
/// let handler = ErrorHandler::new(ErrorHandlerConfig::default());
/// let ctx = ErrorContext::new("core.CleanCache@1.0.0", "1.0.0").with_max_attempts(3);
///
/// let value = handler
///     .execute_with_retry(&ctx, || async { call_remote().await })
///     .await?;
/// ```
pub struct ErrorHandler {
    config: ErrorHandlerConfig,
    breakers: DashMap<String, CircuitBreaker>,
    stats: DashMap<String, WorkflowErrorStats>,
}

impl Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("config", &self.config)
            .field("breakers", &self.breakers.len())
            .field("stats", &self.stats.len())
            .finish()
    }
}

impl ErrorHandler {
    pub fn new(config: ErrorHandlerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ErrorHandlerConfig {
        &self.config
    }

    /// Run `operation` under the default retry and timeout policies
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        ctx: &ErrorContext,
        operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + Debug,
    {
        let retry = self.config.retry.clone();
        let timeout = self.config.timeout.clone();
        self.execute_with_policy(ctx, &retry, &timeout, operation)
            .await
    }

    /// Run `operation` under explicit retry and timeout policies
    pub async fn execute_with_policy<T, E, F, Fut>(
        &self,
        ctx: &ErrorContext,
        retry: &RetryPolicy,
        timeout: &TimeoutPolicy,
        mut operation: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display + Debug,
    {
        let key = ctx.workflow_id.as_str();
        self.acquire(key)?;

        let max_attempts = if ctx.max_attempts > 0 {
            ctx.max_attempts
        } else {
            retry.max_attempts
        }
        .max(1);

        let mut attempt = 1;
        loop {
            let limit = timeout.timeout_for_attempt(attempt);
            let failure = match tokio::time::timeout(limit, operation()).await {
                Ok(Ok(value)) => {
                    self.record_success(key);
                    if attempt > 1 {
                        info!(workflow_id = %key, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Ok(Err(e)) => RetryError::Operation(e),
                Err(_) => RetryError::TimedOut { attempt, limit },
            };

            let message = failure.to_string();
            let category = ctx.category.unwrap_or_else(|| classify_message(&message));

            if attempt >= max_attempts || !retry.should_retry(category) {
                let mut final_ctx = ctx.clone();
                final_ctx.attempt = attempt;
                final_ctx.max_attempts = max_attempts;
                self.record_exhausted(&final_ctx, category, &message, format!("{failure:?}"));
                return Err(failure);
            }

            let delay = retry.delay_for_attempt(attempt);
            debug!(
                workflow_id = %key,
                attempt,
                max_attempts,
                %category,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn acquire<E>(&self, workflow_id: &str) -> Result<(), RetryError<E>> {
        let Some(mut breaker) = self.breakers.get_mut(workflow_id) else {
            return Ok(());
        };
        breaker
            .try_acquire(&self.config.circuit_breaker)
            .map_err(|retry_after| {
                warn!(
                    workflow_id,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "circuit breaker is OPEN, rejecting call"
                );
                RetryError::CircuitOpen {
                    workflow_id: workflow_id.to_string(),
                    retry_after,
                }
            })
    }

    fn record_success(&self, workflow_id: &str) {
        if let Some(mut breaker) = self.breakers.get_mut(workflow_id) {
            breaker.record_success();
        }
    }

    fn record_exhausted(
        &self,
        ctx: &ErrorContext,
        category: ErrorCategory,
        message: &str,
        stack: String,
    ) {
        self.breakers
            .entry(ctx.workflow_id.clone())
            .or_insert_with(CircuitBreaker::new)
            .record_failure(&self.config.circuit_breaker);

        let severity = ctx.severity.unwrap_or_else(|| category.severity());
        self.update_stats(&ctx.workflow_id, category, severity, message, Some(stack));

        match severity {
            ErrorSeverity::Critical | ErrorSeverity::High => error!(
                workflow_id = %ctx.workflow_id,
                version = %ctx.version,
                attempts = ctx.attempt,
                %category,
                %severity,
                error = %message,
                "workflow execution failed after retries"
            ),
            ErrorSeverity::Medium => warn!(
                workflow_id = %ctx.workflow_id,
                version = %ctx.version,
                attempts = ctx.attempt,
                %category,
                %severity,
                error = %message,
                "workflow execution failed after retries"
            ),
            ErrorSeverity::Low => info!(
                workflow_id = %ctx.workflow_id,
                version = %ctx.version,
                attempts = ctx.attempt,
                %category,
                %severity,
                error = %message,
                "workflow execution failed after retries"
            ),
        }

        self.prune_idle();
    }

    /// Record a failure that happened outside `execute_with_retry`
    ///
    /// Only statistics are touched; breakers are not charged.
    pub fn record_error(&self, workflow_id: &str, message: &str) -> ErrorCategory {
        let category = classify_message(message);
        self.update_stats(workflow_id, category, category.severity(), message, None);
        category
    }

    fn update_stats(
        &self,
        workflow_id: &str,
        category: ErrorCategory,
        severity: ErrorSeverity,
        message: &str,
        stack: Option<String>,
    ) {
        let now = Utc::now();
        self.stats
            .entry(workflow_id.to_string())
            .and_modify(|s| {
                s.category = category;
                s.severity = severity;
                s.count += 1;
                s.last_occurrence = now;
                s.last_message = message.to_string();
                s.last_stack = stack.clone();
            })
            .or_insert_with(|| WorkflowErrorStats {
                workflow_id: workflow_id.to_string(),
                category,
                severity,
                count: 1,
                last_occurrence: now,
                last_message: message.to_string(),
                last_stack: stack.clone(),
            });
    }

    /// Evict error stats and closed breakers idle longer than `stats_ttl`
    ///
    /// Returns the number of evicted entries.
    pub fn prune_idle(&self) -> usize {
        let ttl = self.config.stats_ttl;
        let cutoff = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl));

        let stats_before = self.stats.len();
        self.stats
            .retain(|_, s| cutoff.map_or(true, |cutoff| s.last_occurrence >= cutoff));

        let breakers_before = self.breakers.len();
        self.breakers
            .retain(|_, b| b.state() == CircuitState::Open || b.idle_for() < ttl);

        let evicted = (stats_before - self.stats.len()) + (breakers_before - self.breakers.len());
        if evicted > 0 {
            debug!(evicted, "pruned idle error stats and circuit breakers");
        }
        evicted
    }

    pub fn error_stats(&self, workflow_id: &str) -> Option<WorkflowErrorStats> {
        self.stats.get(workflow_id).map(|s| s.clone())
    }

    pub fn all_error_stats(&self) -> Vec<WorkflowErrorStats> {
        let mut all: Vec<_> = self.stats.iter().map(|s| s.value().clone()).collect();
        all.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        all
    }

    /// Clear statistics for one workflow, or all of them when `None`
    pub fn clear_error_stats(&self, workflow_id: Option<&str>) {
        match workflow_id {
            Some(id) => {
                self.stats.remove(id);
            }
            None => self.stats.clear(),
        }
    }

    /// Breaker state for a workflow; workflows that never failed are CLOSED
    pub fn circuit_state(&self, workflow_id: &str) -> CircuitState {
        self.breakers
            .get(workflow_id)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    pub fn circuit_breaker(&self, workflow_id: &str) -> Option<CircuitBreakerSnapshot> {
        self.breakers.get(workflow_id).map(|b| b.snapshot(workflow_id))
    }

    pub fn circuit_breakers(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut all: Vec<_> = self
            .breakers
            .iter()
            .map(|b| b.snapshot(b.key()))
            .collect();
        all.sort_by(|a, b| a.workflow_id.cmp(&b.workflow_id));
        all
    }

    /// Operator reset; returns whether a breaker existed
    pub fn reset_circuit_breaker(&self, workflow_id: &str) -> bool {
        let existed = self.breakers.remove(workflow_id).is_some();
        if existed {
            info!(workflow_id, "circuit breaker reset by operator");
        }
        existed
    }

    pub fn reset_all_circuit_breakers(&self) {
        self.breakers.clear();
        info!("all circuit breakers reset");
    }

    pub fn summary(&self) -> ErrorSummary {
        let mut summary = ErrorSummary::default();
        for entry in self.stats.iter() {
            summary.total_errors += entry.count;
            summary.workflows_with_errors += 1;
            *summary.by_category.entry(entry.category).or_insert(0) += entry.count;
        }
        for breaker in self.breakers.iter() {
            match breaker.state() {
                CircuitState::Open => summary.open_circuits += 1,
                CircuitState::HalfOpen => summary.half_open_circuits += 1,
                CircuitState::Closed => {}
            }
        }
        summary
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new(ErrorHandlerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(threshold: u32) -> ErrorHandlerConfig {
        ErrorHandlerConfig::default()
            .with_retry(
                RetryPolicy::exponential()
                    .with_base_delay(Duration::from_millis(10))
                    .with_max_delay(Duration::from_millis(40))
                    .with_jitter(0.0),
            )
            .with_timeout(TimeoutPolicy::fixed(Duration::from_secs(1)))
            .with_circuit_breaker(
                CircuitBreakerConfig::new()
                    .with_failure_threshold(threshold)
                    .with_recovery_timeout(Duration::from_secs(30)),
            )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_attempt() {
        let handler = ErrorHandler::new(fast_config(3));
        let ctx = ErrorContext::new("wf", "1");

        let result: Result<u32, RetryError<String>> =
            handler.execute_with_retry(&ctx, || async { Ok(7) }).await;

        assert_eq!(result.unwrap(), 7);
        assert!(handler.error_stats("wf").is_none());
        assert!(handler.circuit_breaker("wf").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let handler = ErrorHandler::new(fast_config(3));
        let ctx = ErrorContext::new("wf", "1").with_max_attempts(3);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result = handler
            .execute_with_retry(&ctx, move || {
                let counter = Arc::clone(&counter);
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("connection reset".to_string())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.circuit_state("wf"), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_original_error() {
        let handler = ErrorHandler::new(fast_config(5));
        let ctx = ErrorContext::new("wf", "1").with_max_attempts(2);

        let result: Result<(), _> = handler
            .execute_with_retry(&ctx, || async { Err("Invalid payload: id".to_string()) })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "Invalid payload: id");
        assert_eq!(err.into_operation().unwrap(), "Invalid payload: id");

        let stats = handler.error_stats("wf").unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.category, ErrorCategory::Validation);
        assert_eq!(stats.severity, ErrorSeverity::Low);
        assert_eq!(stats.last_message, "Invalid payload: id");
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_counts_as_failure() {
        let config = fast_config(5).with_timeout(TimeoutPolicy::fixed(Duration::from_millis(50)));
        let handler = ErrorHandler::new(config);
        let ctx = ErrorContext::new("slow", "1").with_max_attempts(2);
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<(), RetryError<String>> = handler
            .execute_with_retry(&ctx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                }
            })
            .await;

        assert!(matches!(result, Err(RetryError::TimedOut { attempt: 2, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            handler.error_stats("slow").unwrap().category,
            ErrorCategory::Timeout
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_circuit_opens_after_threshold_calls() {
        let handler = ErrorHandler::new(fast_config(3));
        let ctx = ErrorContext::new("flaky", "1").with_max_attempts(3);
        let calls = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let counter = Arc::clone(&calls);
            let result: Result<(), RetryError<String>> = handler
                .execute_with_retry(&ctx, move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err("boom".to_string()) }
                })
                .await;
            assert!(matches!(result, Err(RetryError::Operation(_))));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 9);
        assert_eq!(handler.circuit_state("flaky"), CircuitState::Open);

        let counter = Arc::clone(&calls);
        let result: Result<(), RetryError<String>> = handler
            .execute_with_retry(&ctx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("boom".to_string()) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_circuit_open());
        assert!(err.to_string().contains("circuit breaker is OPEN"));
        assert_eq!(calls.load(Ordering::SeqCst), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes_circuit() {
        let handler = ErrorHandler::new(fast_config(1));
        let ctx = ErrorContext::new("wf", "1").with_max_attempts(1);

        let _: Result<(), RetryError<String>> = handler
            .execute_with_retry(&ctx, || async { Err("boom".to_string()) })
            .await;
        assert_eq!(handler.circuit_state("wf"), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(31)).await;

        let result: Result<u8, RetryError<String>> =
            handler.execute_with_retry(&ctx, || async { Ok(1) }).await;
        assert!(result.is_ok());

        let snapshot = handler.circuit_breaker("wf").unwrap();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_category_skips_retries() {
        let config = fast_config(5).with_retry(
            RetryPolicy::exponential()
                .with_max_attempts(5)
                .with_jitter(0.0)
                .with_fail_fast(ErrorCategory::Permission),
        );
        let handler = ErrorHandler::new(config);
        let ctx = ErrorContext::new("wf", "1");
        let calls = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&calls);
        let result: Result<(), RetryError<String>> = handler
            .execute_with_retry(&ctx, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err("permission denied".to_string()) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_circuit_breaker() {
        let handler = ErrorHandler::new(fast_config(1));
        let ctx = ErrorContext::new("wf", "1").with_max_attempts(1);
        let _: Result<(), RetryError<String>> = handler
            .execute_with_retry(&ctx, || async { Err("boom".to_string()) })
            .await;

        assert!(handler.reset_circuit_breaker("wf"));
        assert_eq!(handler.circuit_state("wf"), CircuitState::Closed);
        assert!(!handler.reset_circuit_breaker("wf"));

        let result: Result<u8, RetryError<String>> =
            handler.execute_with_retry(&ctx, || async { Ok(2) }).await;
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_all_circuit_breakers() {
        let handler = ErrorHandler::new(fast_config(1));
        for id in ["a", "b"] {
            let ctx = ErrorContext::new(id, "1").with_max_attempts(1);
            let _: Result<(), RetryError<String>> = handler
                .execute_with_retry(&ctx, || async { Err("boom".to_string()) })
                .await;
            assert_eq!(handler.circuit_state(id), CircuitState::Open);
        }

        handler.reset_all_circuit_breakers();
        assert!(handler.circuit_breakers().is_empty());
        assert_eq!(handler.circuit_state("a"), CircuitState::Closed);
        assert_eq!(handler.circuit_state("b"), CircuitState::Closed);
        assert!(handler.error_stats("a").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_and_clear() {
        let handler = ErrorHandler::new(fast_config(1));
        for id in ["a", "b"] {
            let ctx = ErrorContext::new(id, "1").with_max_attempts(1);
            let _: Result<(), RetryError<String>> = handler
                .execute_with_retry(&ctx, || async { Err("socket closed".to_string()) })
                .await;
        }

        let summary = handler.summary();
        assert_eq!(summary.total_errors, 2);
        assert_eq!(summary.workflows_with_errors, 2);
        assert_eq!(summary.by_category.get(&ErrorCategory::Network), Some(&2));
        assert_eq!(summary.open_circuits, 2);

        handler.clear_error_stats(Some("a"));
        assert_eq!(handler.all_error_stats().len(), 1);
        handler.clear_error_stats(None);
        assert!(handler.all_error_stats().is_empty());
    }

    #[test]
    fn test_record_error_outside_retry() {
        let handler = ErrorHandler::default();
        let category = handler.record_error("wf", "disk quota exceeded");
        assert_eq!(category, ErrorCategory::Resource);
        assert_eq!(handler.error_stats("wf").unwrap().severity, ErrorSeverity::High);
        assert!(handler.circuit_breaker("wf").is_none());
    }

    #[test]
    fn test_prune_idle_keeps_recent_entries() {
        let handler = ErrorHandler::new(ErrorHandlerConfig::default());
        handler.record_error("wf", "boom");
        assert_eq!(handler.prune_idle(), 0);
        assert!(handler.error_stats("wf").is_some());
    }

    #[test]
    fn test_prune_idle_zero_ttl_evicts() {
        let handler =
            ErrorHandler::new(ErrorHandlerConfig::default().with_stats_ttl(Duration::ZERO));
        handler.stats.insert(
            "old".to_string(),
            WorkflowErrorStats {
                workflow_id: "old".to_string(),
                category: ErrorCategory::Unknown,
                severity: ErrorSeverity::Medium,
                count: 1,
                last_occurrence: Utc::now() - chrono::Duration::seconds(5),
                last_message: "boom".to_string(),
                last_stack: None,
            },
        );
        assert_eq!(handler.prune_idle(), 1);
        assert!(handler.error_stats("old").is_none());
    }
}
