//! Lifecycle errors

use std::time::Duration;

use super::admission::AdmissionRejection;
use super::instance::{DependencyCondition, WorkflowStatus};
use crate::history::HistoryError;

/// Errors raised by lifecycle operations
///
/// Precondition failures are immediate and leave the instance unchanged.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(String),

    #[error("cannot {action} instance {id}: status is {status}")]
    InvalidTransition {
        id: String,
        status: WorkflowStatus,
        action: &'static str,
    },

    #[error("instance {id} is waiting on {dependency}: requires {condition}, found {status}")]
    DependencyNotSatisfied {
        id: String,
        dependency: String,
        condition: DependencyCondition,
        status: WorkflowStatus,
    },

    #[error("instance {id} gave up waiting on {dependency} after {timeout:?}")]
    DependencyTimedOut {
        id: String,
        dependency: String,
        timeout: Duration,
    },

    #[error("dependency {from} -> {to} already exists")]
    DuplicateDependency { from: String, to: String },

    #[error("dependency {from} -> {to} not found")]
    DependencyNotFound { from: String, to: String },

    #[error("dependency {from} -> {to} would create a cycle")]
    DependencyCycle { from: String, to: String },

    #[error("instance {id} not admitted: {reason}")]
    AdmissionRejected {
        id: String,
        reason: AdmissionRejection,
    },

    #[error("cleanup task not registered: {0}")]
    UnknownCleanupTask(String),

    #[error(transparent)]
    History(#[from] HistoryError),
}
