//! # Workflow Orchestrator
//!
//! Registers workflow definitions, starts and tracks instances of them,
//! triggers them on cron schedules and keeps a queryable execution history.
//!
//! ## Features
//!
//! - **Instance state machine**: PENDING, RUNNING, PAUSED and terminal states with
//!   dependency gating and resource-aware admission
//! - **Resilience**: Per-attempt timeouts, exponential backoff with jitter and
//!   per-workflow circuit breakers around every start
//! - **Declarative schedules**: Cron triggers loaded from YAML files and reloadable at runtime
//! - **Execution history**: Filtered, paginated queries over a pluggable store
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRunner                          │
//! │  (definitions, start path, API queries, lifetime)           │
//! └─────────────────────────────────────────────────────────────┘
//!        │                 │                  │            ▲
//!        ▼                 ▼                  ▼            │ StartRequest
//! ┌──────────────┐ ┌────────────────┐ ┌───────────────┐ ┌───────────┐
//! │ ErrorHandler │ │LifecycleManager│ │ ExecutionHost │ │ Scheduler │
//! │ retry/breaker│ │ instances/deps │ │ runs bodies   │ │ cron ticks│
//! └──────────────┘ └────────────────┘ └───────────────┘ └───────────┘
//!                          │                  │
//!                          ▼                  ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       HistoryStore                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use workflow_orchestrator::prelude::*;
//!
//! let runner = WorkflowRunner::new(
//!     OrchestratorConfig::from_env(),
//!     RunnerComponents::in_memory(SecurityConfig::default()),
//! );
//! runner
//!     .register_workflow(
//!         WorkflowDefinition::new("core", "SyncUsers", "1.0.0")
//!             .with_executable(executable_fn(|input| async move { Ok(input) })),
//!     )
//!     .await?;
//! runner.initialize().await?;
//! let started = runner.start_workflow("core.SyncUsers", "1.0.0", json!({})).await?;
//! ```

pub mod collaborators;
pub mod config;
mod duration_millis;
pub mod history;
pub mod lifecycle;
pub mod reliability;
pub mod runner;
pub mod scheduler;
pub mod telemetry;

/// Prelude for common imports
pub mod prelude {
    pub use crate::collaborators::{SecurityConfig, UserContext, WorkflowAction};
    pub use crate::config::OrchestratorConfig;
    pub use crate::history::{HistoryFilter, InMemoryHistoryStore, PageRequest};
    pub use crate::lifecycle::{InstanceOptions, LifecycleManager, WorkflowStatus};
    pub use crate::reliability::{CircuitBreakerConfig, ErrorHandler, RetryPolicy};
    pub use crate::runner::{
        executable_fn, RunnerComponents, RunnerError, StartOptions, WorkflowDefinition,
        WorkflowRunner,
    };
    pub use crate::scheduler::{ScheduleConfig, Scheduler, WorkflowRef};
}

// Re-export key types at crate root
pub use config::OrchestratorConfig;
pub use history::{HistoryStore, InMemoryHistoryStore};
pub use lifecycle::{LifecycleManager, WorkflowInstance, WorkflowStatus};
pub use reliability::{CircuitBreakerConfig, ErrorHandler, RetryPolicy};
pub use runner::{RunnerComponents, RunnerError, WorkflowDefinition, WorkflowRunner};
pub use scheduler::{ScheduleConfig, Scheduler};
