//! Workflow runner
//!
//! This module provides:
//! - [`WorkflowRunner`] - The orchestrator owning every other component
//! - [`WorkflowDefinition`] - Registered workflow metadata plus its body
//! - [`ExecutionHost`] - Seam to whatever actually runs workflow bodies
//! - [`RunnerHandle`] - Bounded request channel used by external triggers
//! - API-facing result and filter types

mod api;
mod definition;
mod error;
mod handle;
mod host;
mod service;

pub use api::{
    DefinitionStatus, DeletedCount, HistoryMutationResult, InstanceFilter, MutationResult,
    SystemStatus, WorkflowFilter, WorkflowSummary,
};
pub use definition::{parse_major_version, WorkflowDefinition, WorkflowInfo};
pub use error::RunnerError;
pub use handle::{RunnerHandle, StartOptions, StartRequest, StartedWorkflow};
pub use host::{
    executable_fn, ExecutionHost, ExecutionOutcome, ExecutionReport, HostError,
    LocalExecutionHost, WorkflowExecutable,
};
pub use service::{RunnerComponents, RunnerConfig, WorkflowRunner};
