//! The orchestrator
//!
//! [`WorkflowRunner`] is built once by the composition root and composes
//! every other component:
//!
//! ```text
//!                    ┌───────────────────────────┐
//!  API / triggers ──▶│      WorkflowRunner       │◀── RunnerHandle (mpsc)
//!                    └───────────────────────────┘         ▲
//!                      │        │          │               │
//!                      ▼        ▼          ▼               │
//!               ErrorHandler  Lifecycle  ExecutionHost   Scheduler
//!                             Manager        │
//!                                ▲           ▼
//!                                └── ExecutionReport (mpsc)
//! ```
//!
//! Starts flow `definition lookup -> instance PENDING -> admission ->
//! RUNNING -> host start (retried)`. Completion comes back from the host
//! as a report and is applied to the lifecycle.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::api::{
    DefinitionStatus, HistoryMutationResult, InstanceFilter, MutationResult, SystemStatus,
    WorkflowFilter, WorkflowSummary,
};
use super::definition::{parse_major_version, WorkflowDefinition, WorkflowInfo};
use super::error::RunnerError;
use super::handle::{RunnerHandle, StartOptions, StartRequest, StartedWorkflow};
use super::host::{ExecutionHost, ExecutionOutcome, ExecutionReport, LocalExecutionHost};
use crate::collaborators::{
    AuditEvent, ConfigurationManager, InMemoryConfigurationManager, InMemorySecurityManager,
    SecurityConfig, SecurityManager, UserContext, WorkflowAction,
};
use crate::config::OrchestratorConfig;
use crate::history::{
    ExecutionRecord, ExecutionStatus, HistoryFilter, HistoryStore, InMemoryHistoryStore, Page,
    PageRequest,
};
use crate::lifecycle::{
    HistoryStats, InstanceOptions, LifecycleError, LifecycleEvent, LifecycleManager,
    WorkflowInstance, WorkflowStatus,
};
use crate::reliability::{ErrorContext, ErrorHandler};
use crate::scheduler::{LoadReport, ScheduleConfig, ScheduledWorkflow, Scheduler};

/// Channel sizing for the runner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Bound of the start-request channel
    pub request_capacity: usize,
    /// Bound of the host's completion-report channel
    pub report_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            request_capacity: 64,
            report_capacity: 256,
        }
    }
}

impl RunnerConfig {
    pub fn with_request_capacity(mut self, capacity: usize) -> Self {
        self.request_capacity = capacity.max(1);
        self
    }

    pub fn with_report_capacity(mut self, capacity: usize) -> Self {
        self.report_capacity = capacity.max(1);
        self
    }
}

/// External collaborators injected into the runner
pub struct RunnerComponents {
    pub host: Arc<dyn ExecutionHost>,
    pub history: Arc<dyn HistoryStore>,
    pub configuration: Arc<dyn ConfigurationManager>,
    pub security: Arc<dyn SecurityManager>,
}

impl RunnerComponents {
    /// Local host, in-memory history and in-memory collaborators
    pub fn in_memory(security: SecurityConfig) -> Self {
        let history: Arc<dyn HistoryStore> = Arc::new(InMemoryHistoryStore::new());
        Self {
            host: Arc::new(LocalExecutionHost::new(Arc::clone(&history))),
            history,
            configuration: Arc::new(InMemoryConfigurationManager::new()),
            security: Arc::new(InMemorySecurityManager::new(security)),
        }
    }
}

type FinishWatchers = HashMap<String, Vec<oneshot::Sender<WorkflowStatus>>>;

pub struct WorkflowRunner {
    config: OrchestratorConfig,
    host: Arc<dyn ExecutionHost>,
    history: Arc<dyn HistoryStore>,
    configuration: Arc<dyn ConfigurationManager>,
    security: Arc<dyn SecurityManager>,
    error_handler: Arc<ErrorHandler>,
    lifecycle: Arc<LifecycleManager>,
    scheduler: Arc<Scheduler>,
    definitions: RwLock<BTreeMap<String, WorkflowDefinition>>,
    handle: RunnerHandle,
    requests: Arc<tokio::sync::Mutex<mpsc::Receiver<StartRequest>>>,
    finish_watchers: Mutex<FinishWatchers>,
    initialized: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkflowRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRunner")
            .field("initialized", &self.is_initialized())
            .field("definitions", &self.definitions.read().len())
            .field("lifecycle", &self.lifecycle)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl WorkflowRunner {
    pub fn new(config: OrchestratorConfig, components: RunnerComponents) -> Arc<Self> {
        let (handle, requests) = RunnerHandle::channel(config.runner.request_capacity);
        let scheduler = Scheduler::new(config.scheduler.clone(), handle.clone());
        let lifecycle =
            LifecycleManager::new(config.lifecycle.clone(), Arc::clone(&components.history));
        let error_handler = ErrorHandler::new(config.error_handler.clone());

        Arc::new(Self {
            config,
            host: components.host,
            history: components.history,
            configuration: components.configuration,
            security: components.security,
            error_handler: Arc::new(error_handler),
            lifecycle: Arc::new(lifecycle),
            scheduler: Arc::new(scheduler),
            definitions: RwLock::new(BTreeMap::new()),
            handle,
            requests: Arc::new(tokio::sync::Mutex::new(requests)),
            finish_watchers: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
            started_at: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Sender side for external triggers
    pub fn handle(&self) -> RunnerHandle {
        self.handle.clone()
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.error_handler
    }

    pub fn configuration(&self) -> &Arc<dyn ConfigurationManager> {
        &self.configuration
    }

    pub fn security(&self) -> &Arc<dyn SecurityManager> {
        &self.security
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    // ------------------------------------------------------------------
    // Lifetime
    // ------------------------------------------------------------------

    /// Bring the orchestrator up; a second call is a no-op
    #[instrument(skip(self))]
    pub async fn initialize(self: &Arc<Self>) -> Result<(), RunnerError> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            info!("workflow runner already initialized");
            return Ok(());
        }

        if let Err(e) = self.bring_up().await {
            error!(error = %e, "workflow runner initialization failed");
            self.stop_background().await;
            if let Err(host_err) = self.host.stop().await {
                warn!(error = %host_err, "execution host stop failed during rollback");
            }
            self.scheduler.stop();
            self.lifecycle.stop().await;
            self.initialized.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    async fn bring_up(self: &Arc<Self>) -> Result<(), RunnerError> {
        let definitions: Vec<WorkflowDefinition> =
            self.definitions.read().values().cloned().collect();
        for definition in &definitions {
            self.register_with_host(definition).await?;
        }

        let (report_tx, report_rx) = mpsc::channel(self.config.runner.report_capacity.max(1));
        self.host.start(report_tx).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        {
            let mut tasks = self.tasks.lock();
            tasks.push(self.spawn_request_loop(shutdown_rx.clone()));
            tasks.push(self.spawn_report_loop(report_rx, shutdown_rx.clone()));
            tasks.push(self.spawn_event_loop(shutdown_rx.clone()));
            for definition in definitions.iter().filter(|d| d.auto_start) {
                tasks.push(self.spawn_auto_start(definition, shutdown_rx.clone()));
            }
        }

        let report = self.scheduler.initialize()?;
        self.lifecycle.start();
        self.configuration.initialize().await?;
        self.security.initialize().await?;

        *self.started_at.lock() = Some(Utc::now());
        info!(
            workflows = definitions.len(),
            auto_start = definitions.iter().filter(|d| d.auto_start).count(),
            schedules = report.loaded.len(),
            skipped_schedules = report.skipped.len(),
            "workflow runner initialized"
        );
        Ok(())
    }

    /// Shut everything down in reverse order
    ///
    /// Failures are logged and do not stop the remaining steps.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        if !self.is_initialized() {
            debug!("workflow runner not running");
            return;
        }

        let stopped = self.scheduler.stop();
        debug!(schedules = stopped, "scheduler stopped");
        self.lifecycle.stop().await;
        if let Err(e) = self.configuration.shutdown().await {
            warn!(error = %e, "configuration manager shutdown failed");
        }
        if let Err(e) = self.security.shutdown().await {
            warn!(error = %e, "security manager shutdown failed");
        }
        self.stop_background().await;
        if let Err(e) = self.host.stop().await {
            warn!(error = %e, "execution host shutdown failed");
        }
        if let Err(e) = self.history.close().await {
            warn!(error = %e, "history store close failed");
        }

        self.finish_watchers.lock().clear();
        *self.started_at.lock() = None;
        self.initialized.store(false, Ordering::Release);
        info!("workflow runner stopped");
    }

    async fn stop_background(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "runner task ended abnormally");
            }
        }
    }

    // ------------------------------------------------------------------
    // Definitions
    // ------------------------------------------------------------------

    /// Validate and register a definition
    ///
    /// Invalid definitions are rejected without touching the registry.
    pub async fn register_workflow(
        &self,
        definition: WorkflowDefinition,
    ) -> Result<(), RunnerError> {
        definition.validate()?;
        let identity = definition.identity();
        if self.definitions.read().contains_key(&identity) {
            return Err(RunnerError::AlreadyRegistered(identity));
        }
        if self.is_initialized() {
            self.register_with_host(&definition).await?;
        }

        let mut definitions = self.definitions.write();
        if definitions.contains_key(&identity) {
            return Err(RunnerError::AlreadyRegistered(identity));
        }
        info!(workflow = %identity, category = ?definition.category, "workflow registered");
        definitions.insert(identity, definition);
        Ok(())
    }

    async fn register_with_host(&self, definition: &WorkflowDefinition) -> Result<(), RunnerError> {
        let executable = definition.executable().cloned().ok_or_else(|| {
            RunnerError::InvalidDefinition {
                identity: definition.identity(),
                reason: "executable is required".to_string(),
            }
        })?;
        self.host
            .register_workflow(
                &definition.workflow_id(),
                definition.major_version()?,
                executable,
            )
            .await?;
        Ok(())
    }

    pub fn get_workflow(&self, workflow_id: &str, version: &str) -> Option<WorkflowInfo> {
        self.definitions
            .read()
            .get(&format!("{workflow_id}@{version}"))
            .map(WorkflowDefinition::info)
    }

    // ------------------------------------------------------------------
    // Starting
    // ------------------------------------------------------------------

    /// Start an instance of `workflow_id` at `version`
    pub async fn start_workflow(
        &self,
        workflow_id: &str,
        version: &str,
        data: Value,
    ) -> Result<StartedWorkflow, RunnerError> {
        self.start_workflow_with(workflow_id, version, data, StartOptions::default())
            .await
    }

    #[instrument(skip(self, data, options))]
    pub async fn start_workflow_with(
        &self,
        workflow_id: &str,
        version: &str,
        data: Value,
        options: StartOptions,
    ) -> Result<StartedWorkflow, RunnerError> {
        if !self.is_initialized() {
            return Err(RunnerError::NotInitialized);
        }

        let identity = format!("{workflow_id}@{version}");
        let major = parse_major_version(version)?;
        if !self.definitions.read().contains_key(&identity) {
            return Err(RunnerError::UnknownWorkflow(identity));
        }
        if self
            .configuration
            .get_configuration(workflow_id, version)
            .is_some_and(|config| !config.enabled)
        {
            return Err(RunnerError::Disabled(identity));
        }

        let StartOptions {
            retry,
            timeout,
            priority,
            source,
            created_by,
            on_finish,
        } = options;

        let mut instance_options = InstanceOptions::new()
            .with_priority(priority)
            .with_input(data.clone());
        if let Some(source) = source {
            instance_options = instance_options.with_metadata("source", json!(source));
        }
        if let Some(user) = created_by {
            instance_options = instance_options.with_metadata("created_by", json!(user));
        }

        let instance = self
            .lifecycle
            .create_workflow_instance(workflow_id, version, instance_options);
        if let Some(tx) = on_finish {
            self.finish_watchers
                .lock()
                .entry(instance.id.clone())
                .or_default()
                .push(tx);
        }

        if let Err(e) = self.lifecycle.start_workflow(&instance.id) {
            self.abandon(&instance.id, &e.to_string());
            return Err(e.into());
        }

        let ctx = ErrorContext::new(workflow_id, version)
            .with_metadata("instance_id", json!(instance.id));
        let retry = retry.unwrap_or_else(|| self.error_handler.config().retry.clone());
        let timeout = timeout.unwrap_or_else(|| self.error_handler.config().timeout.clone());

        let result = self
            .error_handler
            .execute_with_policy(&ctx, &retry, &timeout, || {
                let host = Arc::clone(&self.host);
                let workflow_id = workflow_id.to_string();
                let data = data.clone();
                let reference = Some(instance.id.clone());
                async move {
                    host.start_workflow(&workflow_id, major, data, reference)
                        .await
                }
            })
            .await;

        match result {
            Ok(execution_id) => {
                self.lifecycle
                    .set_execution_id(&instance.id, execution_id.clone())?;
                info!(
                    instance_id = %instance.id,
                    execution_id = %execution_id,
                    workflow = %identity,
                    "workflow started"
                );
                Ok(StartedWorkflow {
                    instance_id: instance.id,
                    execution_id,
                    workflow_id: workflow_id.to_string(),
                    version: version.to_string(),
                })
            }
            Err(e) => {
                self.abandon(&instance.id, &e.to_string());
                Err(RunnerError::Execution(e))
            }
        }
    }

    /// Start on behalf of a user after permission, rate-limit and input checks
    pub async fn start_workflow_as(
        &self,
        user: &UserContext,
        workflow_id: &str,
        version: &str,
        data: Value,
    ) -> Result<StartedWorkflow, RunnerError> {
        let resource = format!("{workflow_id}@{version}");
        let result = match self.authorize_start(user, workflow_id, version, &data) {
            Ok(()) => {
                let options = StartOptions::new()
                    .with_source("api")
                    .with_created_by(user.user_id.as_str());
                self.start_workflow_with(workflow_id, version, data, options)
                    .await
            }
            Err(e) => Err(e),
        };

        let event = AuditEvent::new(&user.user_id, "start_workflow", resource, result.is_ok());
        let event = match &result {
            Ok(started) => event.with_details(json!({ "instance_id": started.instance_id })),
            Err(e) => event.with_details(json!({ "error": e.to_string() })),
        };
        self.security.log_audit_event(event);
        result
    }

    fn authorize_start(
        &self,
        user: &UserContext,
        workflow_id: &str,
        version: &str,
        data: &Value,
    ) -> Result<(), RunnerError> {
        if !self
            .security
            .check_workflow_permission(user, workflow_id, version, WorkflowAction::Execute)
        {
            return Err(RunnerError::PermissionDenied {
                user_id: user.user_id.clone(),
                workflow_id: workflow_id.to_string(),
                action: WorkflowAction::Execute.to_string(),
            });
        }
        if !self.security.check_rate_limit(&user.user_id, "start_workflow") {
            return Err(RunnerError::RateLimited(user.user_id.clone()));
        }

        let schema = self
            .configuration
            .get_configuration(workflow_id, version)
            .and_then(|config| config.input_schema);
        self.security.validate_input(data, schema.as_ref())?;
        Ok(())
    }

    fn abandon(&self, instance_id: &str, reason: &str) {
        if let Err(e) = self.lifecycle.fail_workflow(instance_id, reason) {
            debug!(instance_id, error = %e, "could not mark instance failed");
        }
    }

    // ------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------

    fn spawn_request_loop(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let runner = Arc::downgrade(self);
        let requests = Arc::clone(&self.requests);
        tokio::spawn(async move {
            let mut rx = requests.lock().await;
            loop {
                tokio::select! {
                    request = rx.recv() => {
                        let Some(request) = request else { break };
                        let Some(runner) = runner.upgrade() else { break };
                        tokio::spawn(async move { runner.handle_request(request).await });
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("request loop exited");
        })
    }

    async fn handle_request(&self, request: StartRequest) {
        let StartRequest {
            workflow_id,
            version,
            input,
            options,
            reply,
        } = request;
        let result = self
            .start_workflow_with(&workflow_id, &version, input, options)
            .await;
        if reply.send(result).is_err() {
            debug!(workflow_id = %workflow_id, "requester went away before the reply");
        }
    }

    fn spawn_report_loop(
        self: &Arc<Self>,
        mut reports: mpsc::Receiver<ExecutionReport>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let runner = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    report = reports.recv() => {
                        let Some(report) = report else { break };
                        let Some(runner) = runner.upgrade() else { break };
                        runner.apply_report(report);
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("report loop exited");
        })
    }

    fn apply_report(&self, report: ExecutionReport) {
        let Some(instance_id) = report.reference else {
            debug!(execution_id = %report.execution_id, "report without instance reference");
            return;
        };
        let applied = match report.outcome {
            ExecutionOutcome::Completed(output) => {
                self.lifecycle.complete_workflow(&instance_id, Some(output))
            }
            ExecutionOutcome::Failed(message) => {
                self.error_handler
                    .record_error(&report.workflow_id, &message);
                self.lifecycle.fail_workflow(&instance_id, message)
            }
        };
        if let Err(e) = applied {
            // Typically cancelled or swept while the host was still running
            debug!(instance_id = %instance_id, error = %e, "execution report not applied");
        }
    }

    fn spawn_event_loop(self: &Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        let runner = Arc::downgrade(self);
        let mut events = self.lifecycle.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        let Some(runner) = runner.upgrade() else { break };
                        match event {
                            Ok(event) => runner.on_lifecycle_event(event).await,
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, "lifecycle events lagged, reconciling watchers");
                                runner.reconcile_watchers();
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("event loop exited");
        })
    }

    async fn on_lifecycle_event(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Completed { instance_id, .. } => {
                self.notify_finished(&instance_id, WorkflowStatus::Completed)
            }
            LifecycleEvent::Failed { instance_id, .. } => {
                self.notify_finished(&instance_id, WorkflowStatus::Failed)
            }
            LifecycleEvent::Cancelled { instance_id, .. } => {
                self.cancel_execution(&instance_id).await;
                self.notify_finished(&instance_id, WorkflowStatus::Cancelled)
            }
            LifecycleEvent::Removed { instance_id } => {
                self.finish_watchers.lock().remove(&instance_id);
            }
            LifecycleEvent::DependentReady {
                instance_id,
                dependency_id,
            } => {
                info!(instance_id = %instance_id, dependency_id = %dependency_id, "dependent instance ready to start");
            }
            _ => {}
        }
    }

    async fn cancel_execution(&self, instance_id: &str) {
        let Some(execution_id) = self
            .lifecycle
            .get_instance(instance_id)
            .and_then(|instance| instance.execution_id)
        else {
            return;
        };
        match self.host.cancel_execution(&execution_id).await {
            Ok(true) => debug!(instance_id, execution_id = %execution_id, "host execution aborted"),
            Ok(false) => {}
            Err(e) => {
                warn!(instance_id, execution_id = %execution_id, error = %e, "failed to abort host execution")
            }
        }
    }

    fn notify_finished(&self, instance_id: &str, status: WorkflowStatus) {
        if let Some(watchers) = self.finish_watchers.lock().remove(instance_id) {
            for tx in watchers {
                let _ = tx.send(status);
            }
        }
    }

    fn reconcile_watchers(&self) {
        let ids: Vec<String> = self.finish_watchers.lock().keys().cloned().collect();
        for id in ids {
            match self.lifecycle.get_instance(&id) {
                Some(instance) if instance.status.is_terminal() => {
                    self.notify_finished(&id, instance.status)
                }
                Some(_) => {}
                None => {
                    self.finish_watchers.lock().remove(&id);
                }
            }
        }
    }

    fn spawn_auto_start(
        self: &Arc<Self>,
        definition: &WorkflowDefinition,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let runner: Weak<Self> = Arc::downgrade(self);
        let workflow_id = definition.workflow_id();
        let version = definition.version.clone();
        let period = definition.auto_start_interval();

        tokio::spawn(async move {
            let Some(period) = period else {
                if let Some(runner) = runner.upgrade() {
                    runner.auto_start(&workflow_id, &version).await;
                }
                return;
            };

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(runner) = runner.upgrade() else { break };
                        runner.auto_start(&workflow_id, &version).await;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        })
    }

    async fn auto_start(&self, workflow_id: &str, version: &str) {
        let input = json!({ "auto_start": true });
        let options = StartOptions::new().with_source("auto_start");
        match self
            .start_workflow_with(workflow_id, version, input, options)
            .await
        {
            Ok(started) => {
                info!(instance_id = %started.instance_id, workflow_id, "auto-started workflow")
            }
            Err(e) => warn!(workflow_id, error = %e, "auto-start failed"),
        }
    }

    // ------------------------------------------------------------------
    // Instance mutations
    // ------------------------------------------------------------------

    pub fn pause_instance(&self, instance_id: &str) -> MutationResult {
        self.lifecycle
            .pause_workflow(instance_id)
            .map(|_| format!("instance {instance_id} paused"))
            .into()
    }

    pub fn resume_instance(&self, instance_id: &str) -> MutationResult {
        self.lifecycle
            .resume_workflow(instance_id)
            .map(|_| format!("instance {instance_id} resumed"))
            .into()
    }

    /// Cancel an active instance
    ///
    /// The host execution behind it is aborted from the lifecycle event loop,
    /// so it may still be winding down when this returns.
    pub fn cancel_instance(&self, instance_id: &str, reason: Option<String>) -> MutationResult {
        self.lifecycle
            .cancel_workflow(instance_id, reason)
            .map(|_| format!("instance {instance_id} cancelled"))
            .into()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn system_status(&self) -> SystemStatus {
        let started_at = *self.started_at.lock();
        SystemStatus {
            initialized: self.is_initialized(),
            started_at,
            uptime_ms: started_at.and_then(|at| {
                Utc::now()
                    .signed_duration_since(at)
                    .to_std()
                    .ok()
                    .map(|d| d.as_millis() as u64)
            }),
            registered_workflows: self.definitions.read().len(),
            lifecycle: self.lifecycle.get_stats(),
            schedules: self.scheduler.get_stats(),
            errors: self.error_handler.summary(),
            circuit_breakers: self.error_handler.circuit_breakers(),
            security: self.security.security_stats(),
            configuration_issues: self.configuration.validate_all_configurations().len(),
        }
    }

    /// Registered workflows, ordered by identity
    pub fn list_workflows(&self, filter: &WorkflowFilter, page: PageRequest) -> Page<WorkflowSummary> {
        let summaries: Vec<WorkflowSummary> = self
            .definitions
            .read()
            .values()
            .map(|definition| self.summarize(definition))
            .filter(|summary| filter.matches(summary))
            .collect();
        Page::from_sorted(summaries, &page.normalized())
    }

    fn summarize(&self, definition: &WorkflowDefinition) -> WorkflowSummary {
        let workflow_id = definition.workflow_id();
        let instances: Vec<WorkflowInstance> = self
            .lifecycle
            .instances_for_workflow(&workflow_id)
            .into_iter()
            .filter(|i| i.version == definition.version)
            .collect();
        let active_instances = instances.iter().filter(|i| i.status.is_active()).count();
        let enabled = self
            .configuration
            .get_configuration(&workflow_id, &definition.version)
            .map_or(true, |config| config.enabled);

        WorkflowSummary {
            info: definition.info(),
            status: if enabled {
                DefinitionStatus::Active
            } else {
                DefinitionStatus::Inactive
            },
            is_active: active_instances > 0,
            active_instances,
            total_instances: instances.len(),
            schedules: self
                .scheduler
                .get_schedules_for_workflow(&definition.identity())
                .len(),
        }
    }

    /// In-memory instances, oldest first
    pub fn list_instances(&self, filter: &InstanceFilter, page: PageRequest) -> Page<WorkflowInstance> {
        let instances: Vec<WorkflowInstance> = self
            .lifecycle
            .list_instances()
            .into_iter()
            .filter(|instance| filter.matches(instance))
            .collect();
        Page::from_sorted(instances, &page.normalized())
    }

    pub fn get_instance(&self, instance_id: &str) -> Result<WorkflowInstance, RunnerError> {
        self.lifecycle
            .get_instance(instance_id)
            .ok_or_else(|| LifecycleError::InstanceNotFound(instance_id.to_string()).into())
    }

    // ------------------------------------------------------------------
    // Schedules
    // ------------------------------------------------------------------

    pub fn list_schedules(&self) -> Vec<ScheduledWorkflow> {
        self.scheduler.list_schedules()
    }

    pub fn get_schedule(&self, id: &str) -> Result<ScheduledWorkflow, RunnerError> {
        Ok(self.scheduler.get_schedule(id)?)
    }

    pub fn create_schedule(&self, config: ScheduleConfig) -> Result<ScheduledWorkflow, RunnerError> {
        Ok(self.scheduler.create_schedule(config)?)
    }

    pub fn update_schedule(
        &self,
        id: &str,
        config: ScheduleConfig,
    ) -> Result<ScheduledWorkflow, RunnerError> {
        Ok(self.scheduler.update_schedule(id, config)?)
    }

    pub fn delete_schedule(&self, id: &str) -> MutationResult {
        self.scheduler
            .delete_schedule(id)
            .map(|()| format!("schedule {id} deleted"))
            .into()
    }

    pub fn start_schedule(&self, id: &str) -> MutationResult {
        self.scheduler
            .start_schedule(id)
            .map(|()| format!("schedule {id} started"))
            .into()
    }

    pub fn stop_schedule(&self, id: &str) -> MutationResult {
        self.scheduler
            .stop_schedule(id)
            .map(|()| format!("schedule {id} stopped"))
            .into()
    }

    pub fn reload_schedules(&self) -> Result<LoadReport, RunnerError> {
        Ok(self.scheduler.reload_schedules()?)
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub async fn query_history(
        &self,
        filter: &HistoryFilter,
        page: PageRequest,
    ) -> Result<Page<ExecutionRecord>, RunnerError> {
        Ok(self.lifecycle.query_history(filter, page).await?)
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<ExecutionRecord, RunnerError> {
        Ok(self.lifecycle.get_execution(execution_id).await?)
    }

    pub async fn executions_for_definition(
        &self,
        definition_id: &str,
        page: PageRequest,
    ) -> Result<Page<ExecutionRecord>, RunnerError> {
        Ok(self
            .lifecycle
            .executions_for_definition(definition_id, page)
            .await?)
    }

    pub async fn executions_by_status(
        &self,
        statuses: &[ExecutionStatus],
        page: PageRequest,
    ) -> Result<Page<ExecutionRecord>, RunnerError> {
        Ok(self.lifecycle.executions_by_status(statuses, page).await?)
    }

    pub async fn search_history(
        &self,
        text: &str,
        page: PageRequest,
    ) -> Result<Page<ExecutionRecord>, RunnerError> {
        Ok(self.lifecycle.search_history(text, page).await?)
    }

    pub async fn recent_executions(&self, limit: u32) -> Result<Vec<ExecutionRecord>, RunnerError> {
        Ok(self.lifecycle.recent_executions(limit).await?)
    }

    pub async fn history_stats(
        &self,
        filter: Option<&HistoryFilter>,
    ) -> Result<HistoryStats, RunnerError> {
        Ok(self.lifecycle.history_stats(filter).await?)
    }

    pub async fn delete_workflow_history(&self, execution_id: &str) -> HistoryMutationResult {
        self.lifecycle
            .delete_workflow_history(execution_id)
            .await
            .into()
    }

    pub async fn delete_workflow_histories(&self, execution_ids: &[String]) -> HistoryMutationResult {
        self.lifecycle
            .delete_workflow_histories(execution_ids)
            .await
            .into()
    }

    pub async fn clear_definition_history(&self, definition_id: &str) -> HistoryMutationResult {
        self.lifecycle
            .clear_definition_history(definition_id)
            .await
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::WorkflowConfiguration;
    use crate::reliability::RetryPolicy;
    use crate::runner::{executable_fn, HostError, WorkflowExecutable};
    use crate::scheduler::SchedulerConfig;
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> OrchestratorConfig {
        OrchestratorConfig {
            scheduler: SchedulerConfig::new().with_schedules_dir(dir.path().join("schedules")),
            ..Default::default()
        }
    }

    fn echo(namespace: &str, name: &str) -> WorkflowDefinition {
        WorkflowDefinition::new(namespace, name, "1.0.0").with_executable(executable_fn(
            |input| async move { Ok(json!({ "echo": input })) },
        ))
    }

    fn failing() -> WorkflowDefinition {
        WorkflowDefinition::new("core", "Broken", "1.0.0").with_executable(executable_fn(
            |_| async move { Err(anyhow::anyhow!("connection refused by upstream")) },
        ))
    }

    async fn runner_with(
        dir: &TempDir,
        components: RunnerComponents,
        definitions: Vec<WorkflowDefinition>,
    ) -> Arc<WorkflowRunner> {
        let runner = WorkflowRunner::new(test_config(dir), components);
        for definition in definitions {
            runner.register_workflow(definition).await.unwrap();
        }
        runner.initialize().await.unwrap();
        runner
    }

    async fn wait(rx: oneshot::Receiver<WorkflowStatus>) -> WorkflowStatus {
        tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("instance did not finish")
            .expect("watcher dropped")
    }

    #[tokio::test]
    async fn test_start_requires_initialize() {
        let dir = TempDir::new().unwrap();
        let runner = WorkflowRunner::new(
            test_config(&dir),
            RunnerComponents::in_memory(SecurityConfig::default()),
        );
        runner.register_workflow(echo("core", "Echo")).await.unwrap();

        let err = runner
            .start_workflow("core.Echo", "1.0.0", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::NotInitialized));
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_and_duplicate() {
        let dir = TempDir::new().unwrap();
        let runner = WorkflowRunner::new(
            test_config(&dir),
            RunnerComponents::in_memory(SecurityConfig::default()),
        );

        let missing_body = WorkflowDefinition::new("core", "NoBody", "1.0.0");
        assert!(matches!(
            runner.register_workflow(missing_body).await,
            Err(RunnerError::InvalidDefinition { .. })
        ));
        assert!(runner.get_workflow("core.NoBody", "1.0.0").is_none());

        runner.register_workflow(echo("core", "Echo")).await.unwrap();
        assert!(matches!(
            runner.register_workflow(echo("core", "Echo")).await,
            Err(RunnerError::AlreadyRegistered(_))
        ));
        assert!(runner.get_workflow("core.Echo", "1.0.0").is_some());
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![echo("core", "Echo")],
        )
        .await;

        runner.initialize().await.unwrap();
        assert!(runner.is_initialized());
        assert!(runner.lifecycle().is_running());
        assert!(dir.path().join("schedules").is_dir());

        runner.stop().await;
        assert!(!runner.is_initialized());
        assert!(!runner.lifecycle().is_running());
    }

    #[tokio::test]
    async fn test_started_workflow_completes() {
        let dir = TempDir::new().unwrap();
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![echo("core", "Echo")],
        )
        .await;

        let (tx, rx) = oneshot::channel();
        let started = runner
            .start_workflow_with(
                "core.Echo",
                "1.0.0",
                json!({ "n": 7 }),
                StartOptions::new().with_source("test").notify_on_finish(tx),
            )
            .await
            .unwrap();
        assert_eq!(wait(rx).await, WorkflowStatus::Completed);

        let instance = runner.get_instance(&started.instance_id).unwrap();
        assert_eq!(instance.status, WorkflowStatus::Completed);
        assert_eq!(instance.execution_id.as_deref(), Some(started.execution_id.as_str()));
        assert_eq!(instance.metadata["result"], json!({ "echo": { "n": 7 } }));
        assert_eq!(instance.metadata["source"], json!("test"));

        let record = runner.get_execution(&started.execution_id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Complete);
        assert_eq!(record.workflow_definition_id, "core.Echo");
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn test_failed_body_fails_instance_and_records_error() {
        let dir = TempDir::new().unwrap();
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![failing()],
        )
        .await;

        let (tx, rx) = oneshot::channel();
        let started = runner
            .start_workflow_with(
                "core.Broken",
                "1.0.0",
                json!({}),
                StartOptions::new().notify_on_finish(tx),
            )
            .await
            .unwrap();
        assert_eq!(wait(rx).await, WorkflowStatus::Failed);

        let instance = runner.get_instance(&started.instance_id).unwrap();
        assert!(instance.error.unwrap().contains("connection refused"));
        let stats = runner.error_handler().error_stats("core.Broken").unwrap();
        assert_eq!(stats.count, 1);
    }

    #[tokio::test]
    async fn test_unknown_workflow_and_bad_version() {
        let dir = TempDir::new().unwrap();
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![echo("core", "Echo")],
        )
        .await;

        assert!(matches!(
            runner.start_workflow("core.Nope", "1.0.0", json!({})).await,
            Err(RunnerError::UnknownWorkflow(_))
        ));
        assert!(matches!(
            runner.start_workflow("core.Echo", "latest", json!({})).await,
            Err(RunnerError::InvalidVersion(_))
        ));
        assert!(runner.lifecycle().list_instances().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_configuration_blocks_start() {
        let dir = TempDir::new().unwrap();
        let configuration = Arc::new(InMemoryConfigurationManager::new());
        configuration
            .set_configuration(WorkflowConfiguration::new("core.Echo", "1.0.0").with_enabled(false));
        let mut components = RunnerComponents::in_memory(SecurityConfig::default());
        components.configuration = configuration.clone();
        let runner = runner_with(&dir, components, vec![echo("core", "Echo")]).await;

        assert!(matches!(
            runner.start_workflow("core.Echo", "1.0.0", json!({})).await,
            Err(RunnerError::Disabled(_))
        ));

        let page = runner.list_workflows(&WorkflowFilter::default(), PageRequest::default());
        assert_eq!(page.items[0].status, DefinitionStatus::Inactive);
    }

    #[tokio::test]
    async fn test_host_start_failure_is_retried_then_fails_instance() {
        let dir = TempDir::new().unwrap();
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![echo("core", "Echo")],
        )
        .await;
        // Known to the runner but not to the host
        runner.host.stop().await.unwrap();

        let err = runner
            .start_workflow_with(
                "core.Echo",
                "1.0.0",
                json!({}),
                StartOptions::new().with_retry(RetryPolicy::fixed(Duration::from_millis(1), 2)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Execution(_)));

        let failed = runner.lifecycle().instances_by_status(WorkflowStatus::Failed);
        assert_eq!(failed.len(), 1);
        assert_eq!(runner.system_status().errors.total_errors, 1);
    }

    #[tokio::test]
    async fn test_start_as_checks_permission_and_audits() {
        let dir = TempDir::new().unwrap();
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![echo("core", "Echo")],
        )
        .await;

        let viewer = UserContext::new("vera").with_role("viewer");
        let err = runner
            .start_workflow_as(&viewer, "core.Echo", "1.0.0", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::PermissionDenied { .. }));

        let operator = UserContext::new("otto").with_role("operator");
        let started = runner
            .start_workflow_as(&operator, "core.Echo", "1.0.0", json!({}))
            .await
            .unwrap();
        let instance = runner.get_instance(&started.instance_id).unwrap();
        assert_eq!(instance.metadata["created_by"], json!("otto"));

        let denied = runner.security().audit_events(Some("vera"), 10);
        assert_eq!(denied.len(), 1);
        assert!(!denied[0].success);
        let allowed = runner.security().audit_events(Some("otto"), 10);
        assert!(allowed[0].success);

        let mine = runner.list_instances(
            &InstanceFilter {
                created_by: Some("otto".into()),
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert_eq!(mine.page_info.total, 1);
    }

    #[tokio::test]
    async fn test_start_as_rate_limited() {
        let dir = TempDir::new().unwrap();
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default().with_rate_limit_per_minute(1)),
            vec![echo("core", "Echo")],
        )
        .await;
        let admin = UserContext::new("ada").with_role("admin");

        runner
            .start_workflow_as(&admin, "core.Echo", "1.0.0", json!({}))
            .await
            .unwrap();
        assert!(matches!(
            runner
                .start_workflow_as(&admin, "core.Echo", "1.0.0", json!({}))
                .await,
            Err(RunnerError::RateLimited(_))
        ));
    }

    #[tokio::test]
    async fn test_requests_through_handle() {
        let dir = TempDir::new().unwrap();
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![echo("core", "Echo")],
        )
        .await;

        let started = runner
            .handle()
            .request_start("core.Echo", "1.0.0", json!({}), StartOptions::new())
            .await
            .unwrap();
        assert!(runner.get_instance(&started.instance_id).is_ok());

        let err = runner
            .handle()
            .request_start("core.Nope", "1.0.0", json!({}), StartOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::UnknownWorkflow(_)));
    }

    #[tokio::test]
    async fn test_instance_mutations() {
        let dir = TempDir::new().unwrap();
        let slow = WorkflowDefinition::new("core", "Slow", "1").with_executable(executable_fn(
            |_| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            },
        ));
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![slow],
        )
        .await;
        let started = runner.start_workflow("core.Slow", "1", json!({})).await.unwrap();

        assert!(runner.pause_instance(&started.instance_id).success);
        assert!(!runner.pause_instance(&started.instance_id).success);
        assert!(runner.resume_instance(&started.instance_id).success);
        let result = runner.cancel_instance(&started.instance_id, Some("operator".into()));
        assert!(result.success, "{}", result.message);
        assert!(!runner.cancel_instance("missing", None).success);

        runner.stop().await;
    }

    #[tokio::test]
    async fn test_list_workflows_filters() {
        let dir = TempDir::new().unwrap();
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![
                echo("core", "Echo").with_tag("ops").with_author("infra"),
                echo("core", "Sync"),
                echo("reports", "Nightly").with_tag("ops"),
            ],
        )
        .await;

        let all = runner.list_workflows(&WorkflowFilter::default(), PageRequest::new(1, 2));
        assert_eq!(all.page_info.total, 3);
        assert_eq!(all.items.len(), 2);
        assert_eq!(all.items[0].info.name, "Echo");

        let ops = runner.list_workflows(
            &WorkflowFilter {
                tags: vec!["ops".into()],
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert_eq!(ops.page_info.total, 2);

        let core_by_infra = runner.list_workflows(
            &WorkflowFilter {
                namespace: Some("core".into()),
                author: Some("infra".into()),
                ..Default::default()
            },
            PageRequest::default(),
        );
        assert_eq!(core_by_infra.page_info.total, 1);
    }

    #[tokio::test]
    async fn test_auto_start_once() {
        let dir = TempDir::new().unwrap();
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![echo("core", "Boot").with_auto_start(true)],
        )
        .await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while runner.lifecycle().instances_for_workflow("core.Boot").is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        let instances = runner.lifecycle().instances_for_workflow("core.Boot");
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].metadata["source"], json!("auto_start"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_start_repeats_until_stop() {
        let dir = TempDir::new().unwrap();
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![echo("core", "Beat")
                .with_auto_start(true)
                .with_property("interval", json!(250))],
        )
        .await;

        tokio::time::sleep(Duration::from_millis(800)).await;
        let started = runner.lifecycle().instances_for_workflow("core.Beat");
        assert!(started.len() > 1, "only {} auto-started instances", started.len());
        assert!(started
            .iter()
            .all(|i| i.metadata["source"] == json!("auto_start")));

        runner.stop().await;
        let count = runner.lifecycle().instances_for_workflow("core.Beat").len();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(
            runner.lifecycle().instances_for_workflow("core.Beat").len(),
            count
        );
    }

    #[tokio::test]
    async fn test_cancel_aborts_host_execution() {
        let dir = TempDir::new().unwrap();
        let slow = WorkflowDefinition::new("core", "Slow", "1").with_executable(executable_fn(
            |_| async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Value::Null)
            },
        ));
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![slow],
        )
        .await;

        let (tx, rx) = oneshot::channel();
        let started = runner
            .start_workflow_with(
                "core.Slow",
                "1",
                json!({}),
                StartOptions::new().notify_on_finish(tx),
            )
            .await
            .unwrap();
        assert!(runner.cancel_instance(&started.instance_id, None).success);
        assert_eq!(wait(rx).await, WorkflowStatus::Cancelled);

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let record = runner.get_execution(&started.execution_id).await.unwrap();
                if record.status == ExecutionStatus::Terminated {
                    assert_eq!(record.description.as_deref(), Some("execution cancelled"));
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("host execution was not aborted");

        runner.stop().await;
    }

    /// Local host whose shutdown always fails
    struct FailingStopHost(LocalExecutionHost);

    #[async_trait]
    impl ExecutionHost for FailingStopHost {
        async fn register_workflow(
            &self,
            workflow_id: &str,
            version: u32,
            executable: Arc<dyn WorkflowExecutable>,
        ) -> Result<(), HostError> {
            self.0.register_workflow(workflow_id, version, executable).await
        }

        async fn start(&self, reports: mpsc::Sender<ExecutionReport>) -> Result<(), HostError> {
            self.0.start(reports).await
        }

        async fn start_workflow(
            &self,
            workflow_id: &str,
            version: u32,
            data: Value,
            reference: Option<String>,
        ) -> Result<String, HostError> {
            self.0
                .start_workflow(workflow_id, version, data, reference)
                .await
        }

        async fn stop(&self) -> Result<(), HostError> {
            Err(HostError::NotStarted)
        }
    }

    #[tokio::test]
    async fn test_stop_continues_past_failed_step() {
        let dir = TempDir::new().unwrap();
        let mut components = RunnerComponents::in_memory(SecurityConfig::default());
        components.host = Arc::new(FailingStopHost(LocalExecutionHost::new(Arc::clone(
            &components.history,
        ))));
        let runner = runner_with(&dir, components, vec![echo("core", "Echo")]).await;

        runner.stop().await;

        assert!(!runner.is_initialized());
        assert!(!runner.lifecycle().is_running());
        assert!(runner.system_status().started_at.is_none());
        assert!(runner.recent_executions(5).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_closes_history() {
        let dir = TempDir::new().unwrap();
        let runner = runner_with(
            &dir,
            RunnerComponents::in_memory(SecurityConfig::default()),
            vec![echo("core", "Echo")],
        )
        .await;
        runner.stop().await;
        runner.stop().await;

        assert!(!runner.system_status().initialized);
        assert!(runner.recent_executions(5).await.is_err());
        let result = runner.delete_workflow_history("anything").await;
        assert!(!result.success);
    }
}
