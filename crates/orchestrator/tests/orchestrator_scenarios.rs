//! End-to-end scenarios through the public API
//!
//! Run with: cargo test --test orchestrator_scenarios

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};
use workflow_orchestrator::collaborators::SecurityConfig;
use workflow_orchestrator::history::{HistoryFilter, InMemoryHistoryStore, PageRequest};
use workflow_orchestrator::lifecycle::{
    DependencyCondition, InstanceOptions, LifecycleConfig, LifecycleError,
};
use workflow_orchestrator::reliability::{CircuitState, ErrorHandlerConfig, RetryError};
use workflow_orchestrator::runner::{
    executable_fn, ExecutionHost, ExecutionReport, HostError, RunnerComponents, RunnerError,
    StartOptions, WorkflowDefinition, WorkflowExecutable, WorkflowRunner,
};
use workflow_orchestrator::scheduler::{ScheduleConfig, SchedulerConfig, WorkflowRef};
use workflow_orchestrator::{
    CircuitBreakerConfig, LifecycleManager, OrchestratorConfig, RetryPolicy, WorkflowStatus,
};

fn config_in(dir: &TempDir) -> OrchestratorConfig {
    OrchestratorConfig {
        scheduler: SchedulerConfig::new().with_schedules_dir(dir.path().join("schedules")),
        ..Default::default()
    }
}

fn echo(namespace: &str, name: &str, version: &str) -> WorkflowDefinition {
    WorkflowDefinition::new(namespace, name, version)
        .with_executable(executable_fn(|input| async move { Ok(json!({ "echo": input })) }))
}

async fn running(dir: &TempDir, definitions: Vec<WorkflowDefinition>) -> Arc<WorkflowRunner> {
    let runner = WorkflowRunner::new(
        config_in(dir),
        RunnerComponents::in_memory(SecurityConfig::default()),
    );
    for definition in definitions {
        runner.register_workflow(definition).await.unwrap();
    }
    runner.initialize().await.unwrap();
    runner
}

// ============================================
// Scenario A: create, start, complete
// ============================================

#[tokio::test]
async fn scenario_a_instance_runs_to_completion() {
    let manager = LifecycleManager::new(
        LifecycleConfig::default(),
        Arc::new(InMemoryHistoryStore::new()),
    );

    let i1 = manager.create_workflow_instance("core.Sync", "1.0.0", InstanceOptions::new());
    assert_eq!(i1.status, WorkflowStatus::Pending);

    let started = manager.start_workflow(&i1.id).unwrap();
    assert_eq!(started.status, WorkflowStatus::Running);

    let completed = manager
        .complete_workflow(&i1.id, Some(json!({ "result": 1 })))
        .unwrap();
    assert_eq!(completed.status, WorkflowStatus::Completed);
    assert!(completed.completed_at.is_some());
    assert_eq!(completed.metadata["result"], json!({ "result": 1 }));
}

#[tokio::test]
async fn scenario_a_through_the_runner() {
    let dir = TempDir::new().unwrap();
    let runner = running(&dir, vec![echo("core", "Sync", "1.0.0")]).await;

    let (tx, rx) = oneshot::channel();
    let started = runner
        .start_workflow_with(
            "core.Sync",
            "1.0.0",
            json!({ "result": 1 }),
            StartOptions::new().notify_on_finish(tx),
        )
        .await
        .unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status, WorkflowStatus::Completed);

    let instance = runner.get_instance(&started.instance_id).unwrap();
    assert!(instance.completed_at.is_some());
    assert_eq!(instance.metadata["result"], json!({ "echo": { "result": 1 } }));

    let history = runner
        .query_history(
            &HistoryFilter::new().with_definition_id("core.*"),
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(history.page_info.total, 1);
    assert_eq!(history.items[0].id, started.execution_id);

    runner.stop().await;
}

// ============================================
// Scenario B: dependency gating
// ============================================

#[tokio::test]
async fn scenario_b_dependency_blocks_start() {
    let manager = LifecycleManager::new(
        LifecycleConfig::default(),
        Arc::new(InMemoryHistoryStore::new()),
    );
    let i1 = manager.create_workflow_instance("core.Extract", "1", InstanceOptions::new());
    let i2 = manager.create_workflow_instance("core.Load", "1", InstanceOptions::new());
    manager
        .add_dependency(&i2.id, &i1.id, DependencyCondition::Completed, None)
        .unwrap();

    let err = manager.start_workflow(&i2.id).unwrap_err();
    assert!(matches!(err, LifecycleError::DependencyNotSatisfied { .. }));
    assert_eq!(
        manager.get_instance(&i2.id).unwrap().status,
        WorkflowStatus::Pending
    );

    manager.start_workflow(&i1.id).unwrap();
    manager.complete_workflow(&i1.id, None).unwrap();

    let started = manager.start_workflow(&i2.id).unwrap();
    assert_eq!(started.status, WorkflowStatus::Running);
}

// ============================================
// Scenario C: circuit breaker around host starts
// ============================================

/// Host whose starts always fail
#[derive(Default)]
struct RefusingHost {
    calls: AtomicU32,
}

#[async_trait]
impl ExecutionHost for RefusingHost {
    async fn register_workflow(
        &self,
        _workflow_id: &str,
        _version: u32,
        _executable: Arc<dyn WorkflowExecutable>,
    ) -> Result<(), HostError> {
        Ok(())
    }

    async fn start(&self, _reports: mpsc::Sender<ExecutionReport>) -> Result<(), HostError> {
        Ok(())
    }

    async fn start_workflow(
        &self,
        _workflow_id: &str,
        _version: u32,
        _data: Value,
        _reference: Option<String>,
    ) -> Result<String, HostError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HostError::NotStarted)
    }

    async fn stop(&self) -> Result<(), HostError> {
        Ok(())
    }
}

#[tokio::test]
async fn scenario_c_breaker_opens_after_three_exhausted_calls() {
    let dir = TempDir::new().unwrap();
    let host = Arc::new(RefusingHost::default());
    let mut components = RunnerComponents::in_memory(SecurityConfig::default());
    components.host = host.clone();

    let mut config = config_in(&dir);
    config.error_handler = ErrorHandlerConfig::default()
        .with_retry(RetryPolicy::fixed(Duration::from_millis(1), 3))
        .with_circuit_breaker(
            CircuitBreakerConfig::new()
                .with_failure_threshold(3)
                .with_recovery_timeout(Duration::from_secs(60)),
        );

    let runner = WorkflowRunner::new(config, components);
    runner
        .register_workflow(echo("core", "Flaky", "1.0.0"))
        .await
        .unwrap();
    runner.initialize().await.unwrap();

    for _ in 0..3 {
        let err = runner
            .start_workflow("core.Flaky", "1.0.0", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Execution(RetryError::Operation(_))));
    }
    assert_eq!(host.calls.load(Ordering::SeqCst), 9);
    assert_eq!(
        runner.error_handler().circuit_state("core.Flaky"),
        CircuitState::Open
    );

    let err = runner
        .start_workflow("core.Flaky", "1.0.0", json!({}))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("circuit breaker is OPEN"));
    assert_eq!(host.calls.load(Ordering::SeqCst), 9);

    // Every abandoned start leaves a FAILED instance behind
    assert_eq!(
        runner
            .lifecycle()
            .instances_by_status(WorkflowStatus::Failed)
            .len(),
        4
    );

    runner.stop().await;
}

// ============================================
// Scenario D: deleting missing history
// ============================================

#[tokio::test]
async fn scenario_d_delete_missing_history_is_not_an_error() {
    let dir = TempDir::new().unwrap();
    let runner = running(&dir, vec![]).await;

    let result = runner.delete_workflow_history("missing-id").await;
    assert!(!result.success);
    assert_eq!(result.data.deleted_count, 0);

    runner.stop().await;
}

// ============================================
// Scenario E: schedules by workflow identity
// ============================================

#[tokio::test]
async fn scenario_e_filter_schedules_by_workflow() {
    let dir = TempDir::new().unwrap();
    let runner = running(&dir, vec![]).await;

    let yearly = "0 0 1 1 *";
    for (id, workflow) in [
        ("clean-nightly", WorkflowRef::new("core", "CleanCache", "1.0.0")),
        ("clean-weekly", WorkflowRef::new("core", "CleanCache", "1.0.0")),
        ("clean-v2", WorkflowRef::new("core", "CleanCache", "2.0.0")),
        ("sync", WorkflowRef::new("core", "SyncUsers", "1.0.0")),
        ("other-ns", WorkflowRef::new("reports", "CleanCache", "1.0.0")),
    ] {
        runner
            .create_schedule(ScheduleConfig::new(id, workflow, yearly))
            .unwrap();
    }

    let mut ids: Vec<String> = runner
        .scheduler()
        .filter_schedules_by_workflow_properties(Some("core"), Some("CleanCache"), Some("1.0.0"))
        .into_iter()
        .map(|s| s.config.id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["clean-nightly", "clean-weekly"]);

    // Definitions survive a reload from disk
    let report = runner.reload_schedules().unwrap();
    assert_eq!(report.loaded.len(), 5);
    assert_eq!(
        runner
            .scheduler()
            .get_schedules_for_workflow("core.CleanCache@1.0.0")
            .len(),
        2
    );

    runner.stop().await;
}

// ============================================
// Scheduler -> runner round trip
// ============================================

#[tokio::test]
async fn scheduled_trigger_starts_instances() {
    let dir = TempDir::new().unwrap();
    let runner = running(&dir, vec![echo("core", "Tick", "1.0.0")]).await;

    runner
        .create_schedule(
            ScheduleConfig::new("every-second", WorkflowRef::new("core", "Tick", "1.0.0"), "* * * * * *")
                .with_max_executions(1),
        )
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while runner
            .lifecycle()
            .instances_by_status(WorkflowStatus::Completed)
            .is_empty()
        {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("scheduled instance never completed");

    let instances = runner.lifecycle().instances_for_workflow("core.Tick");
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].metadata["source"], json!("schedule:every-second"));
    assert_eq!(runner.get_schedule("every-second").unwrap().run_count, 1);

    runner.stop().await;
}
