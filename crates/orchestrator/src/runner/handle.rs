//! Request channel into the runner
//!
//! External triggers and the scheduler never call the runner directly. They
//! send a [`StartRequest`] through a [`RunnerHandle`] and wait for the
//! acknowledgement:
//!
//! ```text
//! Scheduler / API ──StartRequest──▶ bounded mpsc ──▶ WorkflowRunner
//!        ▲                                               │
//!        └────────── oneshot<Result<StartedWorkflow>> ◀──┘
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use super::error::RunnerError;
use crate::lifecycle::WorkflowStatus;
use crate::reliability::{RetryPolicy, TimeoutPolicy};

/// Acknowledgement for a started workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedWorkflow {
    pub instance_id: String,
    pub execution_id: String,
    pub workflow_id: String,
    pub version: String,
}

/// Per-start overrides
#[derive(Debug, Default)]
pub struct StartOptions {
    /// Replaces the error handler's default retry policy
    pub retry: Option<RetryPolicy>,
    /// Replaces the error handler's default timeout policy
    pub timeout: Option<TimeoutPolicy>,
    pub priority: i32,
    /// Recorded in instance metadata as `source`
    pub source: Option<String>,
    /// Recorded in instance metadata as `created_by`
    pub created_by: Option<String>,
    /// Receives the instance's terminal status
    pub on_finish: Option<oneshot::Sender<WorkflowStatus>>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout(mut self, timeout: TimeoutPolicy) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_created_by(mut self, user_id: impl Into<String>) -> Self {
        self.created_by = Some(user_id.into());
        self
    }

    pub fn notify_on_finish(mut self, tx: oneshot::Sender<WorkflowStatus>) -> Self {
        self.on_finish = Some(tx);
        self
    }
}

/// A queued start
#[derive(Debug)]
pub struct StartRequest {
    pub workflow_id: String,
    pub version: String,
    pub input: serde_json::Value,
    pub options: StartOptions,
    pub reply: oneshot::Sender<Result<StartedWorkflow, RunnerError>>,
}

/// Cloneable sender side of the runner's request channel
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    tx: mpsc::Sender<StartRequest>,
}

impl RunnerHandle {
    /// Create a bounded request channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StartRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a start and wait for the runner's answer
    pub async fn request_start(
        &self,
        workflow_id: impl Into<String>,
        version: impl Into<String>,
        input: serde_json::Value,
        options: StartOptions,
    ) -> Result<StartedWorkflow, RunnerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StartRequest {
                workflow_id: workflow_id.into(),
                version: version.into(),
                input,
                options,
                reply,
            })
            .await
            .map_err(|_| RunnerError::Unavailable)?;

        rx.await.map_err(|_| RunnerError::Unavailable)?
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
