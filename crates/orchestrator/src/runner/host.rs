//! Execution host seam
//!
//! The host runs workflow bodies. The runner only asks it to start an
//! execution and learns about completion from [`ExecutionReport`]s.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::history::{
    ExecutionPointer, ExecutionRecord, ExecutionStatus, HistoryError, HistoryStore,
};

/// The body of a workflow
#[async_trait]
pub trait WorkflowExecutable: Send + Sync + 'static {
    async fn run(&self, input: Value) -> anyhow::Result<Value>;
}

type BoxedBody = Box<dyn Fn(Value) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

struct FnExecutable(BoxedBody);

#[async_trait]
impl WorkflowExecutable for FnExecutable {
    async fn run(&self, input: Value) -> anyhow::Result<Value> {
        (self.0)(input).await
    }
}

/// Wrap an async closure as a workflow body
///
/// ```ignore
/// let body = executable_fn(|input| async move {
///     Ok(json!({ "echo": input }))
/// });
/// ```
pub fn executable_fn<F, Fut>(body: F) -> Arc<dyn WorkflowExecutable>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    Arc::new(FnExecutable(Box::new(move |input| body(input).boxed())))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed(Value),
    Failed(String),
}

/// Completion notice for one execution
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub execution_id: String,
    /// Opaque reference given at start; the runner passes the instance id
    pub reference: Option<String>,
    pub workflow_id: String,
    pub version: u32,
    pub outcome: ExecutionOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("execution host is not started")]
    NotStarted,

    #[error("execution host is already started")]
    AlreadyStarted,

    #[error("no executable registered for {workflow_id} v{version}")]
    UnknownWorkflow { workflow_id: String, version: u32 },

    #[error(transparent)]
    History(#[from] HistoryError),
}

#[async_trait]
pub trait ExecutionHost: Send + Sync + 'static {
    async fn register_workflow(
        &self,
        workflow_id: &str,
        version: u32,
        executable: Arc<dyn WorkflowExecutable>,
    ) -> Result<(), HostError>;

    /// Begin accepting starts; completions are sent to `reports`
    async fn start(&self, reports: mpsc::Sender<ExecutionReport>) -> Result<(), HostError>;

    /// Launch one execution and return its execution id
    async fn start_workflow(
        &self,
        workflow_id: &str,
        version: u32,
        data: Value,
        reference: Option<String>,
    ) -> Result<String, HostError>;

    /// Abort one running execution
    ///
    /// Returns `false` when the execution is unknown or already finished.
    /// Hosts that cannot interrupt a body keep this default and let it run
    /// to completion.
    async fn cancel_execution(&self, _execution_id: &str) -> Result<bool, HostError> {
        Ok(false)
    }

    /// Stop accepting starts and terminate running executions
    async fn stop(&self) -> Result<(), HostError>;
}

struct RunningExecution {
    record: ExecutionRecord,
    handle: JoinHandle<()>,
}

/// Runs workflow bodies as tokio tasks and records them in the history store
pub struct LocalExecutionHost {
    history: Arc<dyn HistoryStore>,
    workflows: RwLock<HashMap<(String, u32), Arc<dyn WorkflowExecutable>>>,
    reports: Mutex<Option<mpsc::Sender<ExecutionReport>>>,
    running: Arc<Mutex<HashMap<String, RunningExecution>>>,
}

impl std::fmt::Debug for LocalExecutionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalExecutionHost")
            .field("workflows", &self.workflows.read().len())
            .field("running", &self.running.lock().len())
            .finish()
    }
}

impl LocalExecutionHost {
    pub fn new(history: Arc<dyn HistoryStore>) -> Self {
        Self {
            history,
            workflows: RwLock::new(HashMap::new()),
            reports: Mutex::new(None),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Executions that have not finished yet
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }
}

#[async_trait]
impl ExecutionHost for LocalExecutionHost {
    async fn register_workflow(
        &self,
        workflow_id: &str,
        version: u32,
        executable: Arc<dyn WorkflowExecutable>,
    ) -> Result<(), HostError> {
        let replaced = self
            .workflows
            .write()
            .insert((workflow_id.to_string(), version), executable)
            .is_some();
        debug!(workflow_id, version, replaced, "executable registered");
        Ok(())
    }

    async fn start(&self, reports: mpsc::Sender<ExecutionReport>) -> Result<(), HostError> {
        let mut slot = self.reports.lock();
        if slot.is_some() {
            return Err(HostError::AlreadyStarted);
        }
        *slot = Some(reports);
        info!(workflows = self.workflows.read().len(), "execution host started");
        Ok(())
    }

    async fn start_workflow(
        &self,
        workflow_id: &str,
        version: u32,
        data: Value,
        reference: Option<String>,
    ) -> Result<String, HostError> {
        let reports = self.reports.lock().clone().ok_or(HostError::NotStarted)?;
        let executable = self
            .workflows
            .read()
            .get(&(workflow_id.to_string(), version))
            .cloned()
            .ok_or_else(|| HostError::UnknownWorkflow {
                workflow_id: workflow_id.to_string(),
                version,
            })?;

        let mut record = ExecutionRecord::new(workflow_id, version, data.clone());
        if let Some(reference) = &reference {
            record = record.with_description(format!("instance {reference}"));
        }
        record
            .execution_pointers
            .push(ExecutionPointer::start(0, Some("run".to_string())));
        self.history.save(record.clone()).await?;

        let execution_id = record.id.clone();
        let task_record = record.clone();
        let history = Arc::clone(&self.history);
        let running = Arc::clone(&self.running);

        {
            // Held across spawn so the task cannot deregister before it is registered
            let mut guard = self.running.lock();
            let handle = tokio::spawn(async move {
                let mut record = task_record;
                let outcome = match executable.run(data).await {
                    Ok(output) => {
                        record.finish(ExecutionStatus::Complete, Some(output.clone()));
                        ExecutionOutcome::Completed(output)
                    }
                    Err(e) => {
                        let message = format!("{e:#}");
                        record.finish(ExecutionStatus::Terminated, None);
                        record.description = Some(message.clone());
                        ExecutionOutcome::Failed(message)
                    }
                };

                if let Err(e) = history.save(record.clone()).await {
                    warn!(execution_id = %record.id, error = %e, "failed to persist execution result");
                }
                running.lock().remove(&record.id);

                let report = ExecutionReport {
                    execution_id: record.id,
                    reference,
                    workflow_id: record.workflow_definition_id,
                    version: record.version,
                    outcome,
                };
                if reports.send(report).await.is_err() {
                    debug!("report receiver dropped");
                }
            });
            guard.insert(execution_id.clone(), RunningExecution { record, handle });
        }

        debug!(workflow_id, version, execution_id = %execution_id, "execution started");
        Ok(execution_id)
    }

    async fn cancel_execution(&self, execution_id: &str) -> Result<bool, HostError> {
        let removed = self.running.lock().remove(execution_id);
        let Some(RunningExecution { mut record, handle }) = removed else {
            return Ok(false);
        };
        handle.abort();
        record.finish(ExecutionStatus::Terminated, None);
        record.description = Some("execution cancelled".to_string());
        self.history.save(record).await?;
        info!(execution_id, "execution cancelled");
        Ok(true)
    }

    async fn stop(&self) -> Result<(), HostError> {
        self.reports.lock().take();
        let running: Vec<RunningExecution> =
            self.running.lock().drain().map(|(_, run)| run).collect();

        let terminated = running.len();
        for RunningExecution { mut record, handle } in running {
            handle.abort();
            record.finish(ExecutionStatus::Terminated, None);
            record.description = Some("execution host stopped".to_string());
            if let Err(e) = self.history.save(record).await {
                warn!(error = %e, "failed to record terminated execution");
            }
        }

        info!(terminated, "execution host stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryHistoryStore;
    use serde_json::json;
    use std::time::Duration;

    async fn started_host() -> (
        LocalExecutionHost,
        Arc<InMemoryHistoryStore>,
        mpsc::Receiver<ExecutionReport>,
    ) {
        let store = Arc::new(InMemoryHistoryStore::new());
        let host = LocalExecutionHost::new(store.clone());
        host.register_workflow(
            "core.Echo",
            1,
            executable_fn(|input| async move { Ok(json!({ "echo": input })) }),
        )
        .await
        .unwrap();
        host.register_workflow(
            "core.Fail",
            1,
            executable_fn(|_| async move { Err(anyhow::anyhow!("disk quota exceeded")) }),
        )
        .await
        .unwrap();
        host.register_workflow(
            "core.Sleep",
            1,
            executable_fn(|_| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            }),
        )
        .await
        .unwrap();

        let (tx, rx) = mpsc::channel(8);
        host.start(tx).await.unwrap();
        (host, store, rx)
    }

    #[tokio::test]
    async fn test_not_started() {
        let host = LocalExecutionHost::new(Arc::new(InMemoryHistoryStore::new()));
        let err = host
            .start_workflow("core.Echo", 1, Value::Null, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::NotStarted));
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let (host, _, _rx) = started_host().await;
        let (tx, _rx2) = mpsc::channel(1);
        assert!(matches!(host.start(tx).await, Err(HostError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_completed_execution_is_recorded_and_reported() {
        let (host, store, mut rx) = started_host().await;

        let id = host
            .start_workflow("core.Echo", 1, json!({ "n": 1 }), Some("instance-1".into()))
            .await
            .unwrap();

        let report = rx.recv().await.unwrap();
        assert_eq!(report.execution_id, id);
        assert_eq!(report.reference.as_deref(), Some("instance-1"));
        assert_eq!(
            report.outcome,
            ExecutionOutcome::Completed(json!({ "echo": { "n": 1 } }))
        );

        let record = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Complete);
        assert_eq!(record.data, json!({ "echo": { "n": 1 } }));
        assert!(record.complete_time.is_some());
        assert!(record.execution_pointers.iter().all(|p| !p.active));
        assert_eq!(host.running_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_execution() {
        let (host, store, mut rx) = started_host().await;
        let id = host
            .start_workflow("core.Fail", 1, Value::Null, None)
            .await
            .unwrap();

        let report = rx.recv().await.unwrap();
        assert_eq!(
            report.outcome,
            ExecutionOutcome::Failed("disk quota exceeded".to_string())
        );
        let record = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Terminated);
        assert_eq!(record.description.as_deref(), Some("disk quota exceeded"));
    }

    #[tokio::test]
    async fn test_unknown_workflow_or_version() {
        let (host, store, _rx) = started_host().await;
        let err = host
            .start_workflow("core.Echo", 2, Value::Null, None)
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::UnknownWorkflow { version: 2, .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_execution_aborts_body() {
        let (host, store, mut rx) = started_host().await;
        let id = host
            .start_workflow("core.Sleep", 1, Value::Null, Some("instance-9".into()))
            .await
            .unwrap();

        assert!(host.cancel_execution(&id).await.unwrap());
        assert_eq!(host.running_count(), 0);
        assert!(!host.cancel_execution(&id).await.unwrap());

        let record = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Terminated);
        assert_eq!(record.description.as_deref(), Some("execution cancelled"));
        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_stop_terminates_running_executions() {
        let (host, store, _rx) = started_host().await;
        let id = host
            .start_workflow("core.Sleep", 1, Value::Null, None)
            .await
            .unwrap();
        assert_eq!(host.running_count(), 1);

        host.stop().await.unwrap();
        assert_eq!(host.running_count(), 0);

        let record = store.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(record.status, ExecutionStatus::Terminated);
        assert!(matches!(
            host.start_workflow("core.Echo", 1, Value::Null, None).await,
            Err(HostError::NotStarted)
        ));
    }
}
