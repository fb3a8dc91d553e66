//! Workflow instance lifecycle
//!
//! [`LifecycleManager`] owns the in-memory instance registry: the status
//! state machine, the dependency graph between instances, admission control
//! and the periodic cleanup/stuck-instance sweeps. It also exposes a query
//! façade over the durable execution history.

mod admission;
mod cleanup;
mod error;
mod events;
mod history_view;
mod instance;
mod manager;
mod registry;

pub use admission::{AdmissionConfig, AdmissionRejection, ResourceUtilization};
pub use cleanup::CleanupTask;
pub use error::LifecycleError;
pub use events::LifecycleEvent;
pub use history_view::{DeleteResult, HistoryStats};
pub use instance::{
    DependencyCondition, InstanceOptions, ResourceUsage, WorkflowDependency, WorkflowInstance,
    WorkflowStatus,
};
pub use manager::{LifecycleConfig, LifecycleManager, LifecycleStats};
