//! Orchestrator configuration
//!
//! Every component config has sensible defaults; [`OrchestratorConfig::from_env`]
//! overrides them from `ORCHESTRATOR_*` environment variables. Durations are
//! given in milliseconds.
//!
//! | variable | field |
//! |---|---|
//! | `ORCHESTRATOR_MAX_CONCURRENT_WORKFLOWS` | `lifecycle.admission.max_concurrent_workflows` |
//! | `ORCHESTRATOR_MAX_WORKFLOW_DURATION_MS` | `lifecycle.max_workflow_duration` |
//! | `ORCHESTRATOR_CLEANUP_INTERVAL_MS` | `lifecycle.cleanup_interval` |
//! | `ORCHESTRATOR_STATUS_UPDATE_INTERVAL_MS` | `lifecycle.status_update_interval` |
//! | `ORCHESTRATOR_MAX_MEMORY_MB` | `lifecycle.admission.max_memory_mb` |
//! | `ORCHESTRATOR_MAX_CPU_PERCENT` | `lifecycle.admission.max_cpu_percent` |
//! | `ORCHESTRATOR_MAX_DISK_MB` | `lifecycle.admission.max_disk_mb` |
//! | `ORCHESTRATOR_SCHEDULES_DIR` | `scheduler.schedules_dir` |
//! | `ORCHESTRATOR_RETRY_MAX_ATTEMPTS` | `error_handler.retry.max_attempts` |
//! | `ORCHESTRATOR_RETRY_BASE_DELAY_MS` | `error_handler.retry.base_delay` |
//! | `ORCHESTRATOR_RETRY_MAX_DELAY_MS` | `error_handler.retry.max_delay` |
//! | `ORCHESTRATOR_DEFAULT_TIMEOUT_MS` | `error_handler.timeout.default_timeout` |
//! | `ORCHESTRATOR_MAX_TIMEOUT_MS` | `error_handler.timeout.max_timeout` |
//! | `ORCHESTRATOR_CIRCUIT_FAILURE_THRESHOLD` | `error_handler.circuit_breaker.failure_threshold` |
//! | `ORCHESTRATOR_CIRCUIT_RECOVERY_TIMEOUT_MS` | `error_handler.circuit_breaker.recovery_timeout` |
//! | `ORCHESTRATOR_ERROR_STATS_TTL_MS` | `error_handler.stats_ttl` |

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::lifecycle::LifecycleConfig;
use crate::reliability::ErrorHandlerConfig;
use crate::runner::RunnerConfig;
use crate::scheduler::SchedulerConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub lifecycle: LifecycleConfig,
    pub error_handler: ErrorHandlerConfig,
    pub scheduler: SchedulerConfig,
    pub runner: RunnerConfig,
}

impl OrchestratorConfig {
    /// Defaults overridden by `ORCHESTRATOR_*` environment variables
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vars = Vars(&lookup);
        let mut config = Self::default();

        let lifecycle = &mut config.lifecycle;
        vars.set(
            "ORCHESTRATOR_MAX_CONCURRENT_WORKFLOWS",
            &mut lifecycle.admission.max_concurrent_workflows,
        );
        vars.set_millis(
            "ORCHESTRATOR_MAX_WORKFLOW_DURATION_MS",
            &mut lifecycle.max_workflow_duration,
        );
        vars.set_millis("ORCHESTRATOR_CLEANUP_INTERVAL_MS", &mut lifecycle.cleanup_interval);
        vars.set_millis(
            "ORCHESTRATOR_STATUS_UPDATE_INTERVAL_MS",
            &mut lifecycle.status_update_interval,
        );
        vars.set("ORCHESTRATOR_MAX_MEMORY_MB", &mut lifecycle.admission.max_memory_mb);
        vars.set("ORCHESTRATOR_MAX_CPU_PERCENT", &mut lifecycle.admission.max_cpu_percent);
        vars.set("ORCHESTRATOR_MAX_DISK_MB", &mut lifecycle.admission.max_disk_mb);

        if let Some(dir) = lookup("ORCHESTRATOR_SCHEDULES_DIR").filter(|d| !d.is_empty()) {
            config.scheduler.schedules_dir = dir.into();
        }

        let handler = &mut config.error_handler;
        vars.set("ORCHESTRATOR_RETRY_MAX_ATTEMPTS", &mut handler.retry.max_attempts);
        vars.set_millis("ORCHESTRATOR_RETRY_BASE_DELAY_MS", &mut handler.retry.base_delay);
        vars.set_millis("ORCHESTRATOR_RETRY_MAX_DELAY_MS", &mut handler.retry.max_delay);
        vars.set_millis("ORCHESTRATOR_DEFAULT_TIMEOUT_MS", &mut handler.timeout.default_timeout);
        vars.set_millis("ORCHESTRATOR_MAX_TIMEOUT_MS", &mut handler.timeout.max_timeout);
        vars.set(
            "ORCHESTRATOR_CIRCUIT_FAILURE_THRESHOLD",
            &mut handler.circuit_breaker.failure_threshold,
        );
        vars.set_millis(
            "ORCHESTRATOR_CIRCUIT_RECOVERY_TIMEOUT_MS",
            &mut handler.circuit_breaker.recovery_timeout,
        );
        vars.set_millis("ORCHESTRATOR_ERROR_STATS_TTL_MS", &mut handler.stats_ttl);

        config
    }
}

struct Vars<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn parse<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = (self.0)(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(key, value = %raw, "ignoring invalid configuration value");
                None
            }
        }
    }

    fn set<T: FromStr>(&self, key: &str, field: &mut T) {
        if let Some(value) = self.parse(key) {
            *field = value;
        }
    }

    fn set_millis(&self, key: &str, field: &mut Duration) {
        if let Some(ms) = self.parse::<u64>(key) {
            *field = Duration::from_millis(ms);
        }
    }
}
