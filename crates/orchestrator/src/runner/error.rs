//! Runner errors

use super::host::HostError;
use crate::collaborators::CollaboratorError;
use crate::lifecycle::LifecycleError;
use crate::reliability::RetryError;
use crate::scheduler::SchedulerError;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("workflow runner is not initialized")]
    NotInitialized,

    #[error("workflow runner is not accepting requests")]
    Unavailable,

    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("workflow already registered: {0}")]
    AlreadyRegistered(String),

    #[error("invalid workflow definition {identity}: {reason}")]
    InvalidDefinition { identity: String, reason: String },

    #[error("invalid workflow version '{0}'")]
    InvalidVersion(String),

    #[error("workflow {0} is disabled")]
    Disabled(String),

    #[error("user {user_id} may not {action} workflow {workflow_id}")]
    PermissionDenied {
        user_id: String,
        workflow_id: String,
        action: String,
    },

    #[error("rate limit exceeded for user {0}")]
    RateLimited(String),

    /// Start call failed after the error handler gave up
    #[error("workflow execution failed: {0}")]
    Execution(RetryError<HostError>),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
}

impl From<RetryError<HostError>> for RunnerError {
    fn from(err: RetryError<HostError>) -> Self {
        Self::Execution(err)
    }
}
