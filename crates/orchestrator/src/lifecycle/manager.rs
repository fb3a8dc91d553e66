//! LifecycleManager: instance state machine, dependencies and admission

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::admission::{AdmissionConfig, ResourceUtilization};
use super::cleanup::CleanupTask;
use super::error::LifecycleError;
use super::events::LifecycleEvent;
use super::instance::{
    DependencyCondition, InstanceOptions, ResourceUsage, WorkflowDependency, WorkflowInstance,
    WorkflowStatus,
};
use super::registry::InstanceRegistry;
use crate::history::HistoryStore;

/// Lifecycle manager configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleConfig {
    /// Admission thresholds checked on start
    pub admission: AdmissionConfig,

    /// Wall-clock cap for RUNNING instances, and retention for terminal ones
    #[serde(with = "crate::duration_millis")]
    pub max_workflow_duration: Duration,

    /// How often terminal instances are swept
    #[serde(with = "crate::duration_millis")]
    pub cleanup_interval: Duration,

    /// How often RUNNING instances are checked against the duration cap
    #[serde(with = "crate::duration_millis")]
    pub status_update_interval: Duration,

    /// Buffer size of the lifecycle event channel
    pub event_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            admission: AdmissionConfig::default(),
            max_workflow_duration: Duration::from_secs(60 * 60),
            cleanup_interval: Duration::from_secs(5 * 60),
            status_update_interval: Duration::from_secs(30),
            event_capacity: 256,
        }
    }
}

impl LifecycleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admission(mut self, admission: AdmissionConfig) -> Self {
        self.admission = admission;
        self
    }

    pub fn with_max_workflow_duration(mut self, duration: Duration) -> Self {
        self.max_workflow_duration = duration;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_status_update_interval(mut self, interval: Duration) -> Self {
        self.status_update_interval = interval;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

/// In-memory lifecycle statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleStats {
    pub total: usize,
    pub by_status: BTreeMap<WorkflowStatus, usize>,
    pub average_execution_time_ms: Option<f64>,
    pub resource_utilization: ResourceUtilization,
}

/// Owns workflow instances and every transition applied to them
///
/// All registry mutations happen under a single write lock that is never
/// held across an await, so transitions on an instance are totally ordered.
///
/// ```text
/// PENDING --start--> RUNNING --pause--> PAUSED
///                       ^                  |
///                       +-----resume-------+
/// RUNNING|PAUSED --complete--> COMPLETED
/// active --fail--> FAILED      active --cancel--> CANCELLED
/// terminal --(idle > max_workflow_duration)--> removed
/// ```
pub struct LifecycleManager {
    config: LifecycleConfig,
    registry: RwLock<InstanceRegistry>,
    cleanup_tasks: RwLock<HashMap<String, Arc<dyn CleanupTask>>>,
    pub(super) history: Arc<dyn HistoryStore>,
    events: broadcast::Sender<LifecycleEvent>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    loop_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("config", &self.config)
            .field("instances", &self.registry.read().len())
            .finish()
    }
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig, history: Arc<dyn HistoryStore>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            registry: RwLock::new(InstanceRegistry::default()),
            cleanup_tasks: RwLock::new(HashMap::new()),
            history,
            events,
            shutdown_tx: Mutex::new(None),
            loop_handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: LifecycleEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Create a PENDING instance
    pub fn create_workflow_instance(
        &self,
        workflow_id: &str,
        version: &str,
        options: InstanceOptions,
    ) -> WorkflowInstance {
        let instance = WorkflowInstance::new(workflow_id, version, options);
        self.registry.write().insert(instance.clone());

        info!(
            instance_id = %instance.id,
            workflow_id,
            version,
            priority = instance.priority,
            "workflow instance created"
        );
        self.emit(LifecycleEvent::Created {
            instance_id: instance.id.clone(),
            workflow_id: instance.workflow_id.clone(),
        });
        instance
    }

    /// PENDING -> RUNNING, after dependency and admission checks
    #[instrument(skip(self))]
    pub fn start_workflow(&self, id: &str) -> Result<WorkflowInstance, LifecycleError> {
        let now = Utc::now();
        let started = {
            let mut registry = self.registry.write();
            let instance = registry
                .get(id)
                .ok_or_else(|| LifecycleError::InstanceNotFound(id.to_string()))?;

            if instance.status != WorkflowStatus::Pending {
                return Err(LifecycleError::InvalidTransition {
                    id: id.to_string(),
                    status: instance.status,
                    action: "start",
                });
            }

            for dependency in &instance.dependencies {
                let Some(target) = registry.get(&dependency.instance_id) else {
                    continue;
                };
                if dependency.condition.is_satisfied_by(target.status) {
                    continue;
                }
                if let (true, Some(timeout)) = (dependency.is_expired(now), dependency.timeout) {
                    return Err(LifecycleError::DependencyTimedOut {
                        id: id.to_string(),
                        dependency: dependency.instance_id.clone(),
                        timeout,
                    });
                }
                return Err(LifecycleError::DependencyNotSatisfied {
                    id: id.to_string(),
                    dependency: dependency.instance_id.clone(),
                    condition: dependency.condition,
                    status: target.status,
                });
            }

            self.admit(&registry, instance)?;

            registry
                .update(id, |instance| {
                    instance.status = WorkflowStatus::Running;
                    instance.started_at = now;
                    instance.updated_at = now;
                    instance.clone()
                })
                .ok_or_else(|| LifecycleError::InstanceNotFound(id.to_string()))?
        };

        info!(instance_id = id, workflow_id = %started.workflow_id, "workflow instance started");
        self.emit(LifecycleEvent::Started {
            instance_id: started.id.clone(),
            workflow_id: started.workflow_id.clone(),
        });
        Ok(started)
    }

    /// RUNNING -> PAUSED
    pub fn pause_workflow(&self, id: &str) -> Result<WorkflowInstance, LifecycleError> {
        let (paused, _) = self.transition(
            id,
            "pause",
            |status| status == WorkflowStatus::Running,
            |instance, now| {
                instance.status = WorkflowStatus::Paused;
                instance.paused_at = Some(now);
            },
        )?;
        info!(instance_id = id, "workflow instance paused");
        self.emit(LifecycleEvent::Paused {
            instance_id: paused.id.clone(),
        });
        Ok(paused)
    }

    /// PAUSED -> RUNNING, subject to the same admission checks as a start
    pub fn resume_workflow(&self, id: &str) -> Result<WorkflowInstance, LifecycleError> {
        let now = Utc::now();
        let resumed = {
            let mut registry = self.registry.write();
            let instance = registry
                .get(id)
                .ok_or_else(|| LifecycleError::InstanceNotFound(id.to_string()))?;

            if instance.status != WorkflowStatus::Paused {
                return Err(LifecycleError::InvalidTransition {
                    id: id.to_string(),
                    status: instance.status,
                    action: "resume",
                });
            }

            self.admit(&registry, instance)?;

            registry
                .update(id, |instance| {
                    instance.status = WorkflowStatus::Running;
                    instance.resumed_at = Some(now);
                    instance.updated_at = now;
                    instance.clone()
                })
                .ok_or_else(|| LifecycleError::InstanceNotFound(id.to_string()))?
        };

        info!(instance_id = id, "workflow instance resumed");
        self.emit(LifecycleEvent::Resumed {
            instance_id: resumed.id.clone(),
        });
        Ok(resumed)
    }

    /// RUNNING|PAUSED -> COMPLETED; `result` is stored under `metadata.result`
    #[instrument(skip(self, result))]
    pub fn complete_workflow(
        &self,
        id: &str,
        result: Option<serde_json::Value>,
    ) -> Result<WorkflowInstance, LifecycleError> {
        let (completed, ready) = self.transition(
            id,
            "complete",
            |status| matches!(status, WorkflowStatus::Running | WorkflowStatus::Paused),
            |instance, now| {
                instance.status = WorkflowStatus::Completed;
                instance.completed_at = Some(now);
                if let Some(result) = result {
                    instance.metadata.insert("result".to_string(), result);
                }
            },
        )?;
        info!(
            instance_id = id,
            workflow_id = %completed.workflow_id,
            execution_time_ms = completed.execution_time().map(|d| d.as_millis() as u64),
            "workflow instance completed"
        );
        self.emit(LifecycleEvent::Completed {
            instance_id: completed.id.clone(),
            workflow_id: completed.workflow_id.clone(),
        });
        self.emit_ready(id, ready);
        Ok(completed)
    }

    /// Any active status -> FAILED
    #[instrument(skip(self, error))]
    pub fn fail_workflow(
        &self,
        id: &str,
        error: impl Into<String>,
    ) -> Result<WorkflowInstance, LifecycleError> {
        let error = error.into();
        let (failed, ready) = self.transition(
            id,
            "fail",
            WorkflowStatus::is_active,
            |instance, _| {
                instance.status = WorkflowStatus::Failed;
                instance.error = Some(error.clone());
            },
        )?;
        warn!(
            instance_id = id,
            workflow_id = %failed.workflow_id,
            error = %error,
            "workflow instance failed"
        );
        self.emit(LifecycleEvent::Failed {
            instance_id: failed.id.clone(),
            workflow_id: failed.workflow_id.clone(),
            error,
        });
        self.emit_ready(id, ready);
        Ok(failed)
    }

    /// Any active status -> CANCELLED; `reason` is stored under `metadata.cancel_reason`
    pub fn cancel_workflow(
        &self,
        id: &str,
        reason: Option<String>,
    ) -> Result<WorkflowInstance, LifecycleError> {
        let (cancelled, ready) = self.transition(
            id,
            "cancel",
            WorkflowStatus::is_active,
            |instance, now| {
                instance.status = WorkflowStatus::Cancelled;
                instance.cancelled_at = Some(now);
                if let Some(reason) = &reason {
                    instance
                        .metadata
                        .insert("cancel_reason".to_string(), reason.clone().into());
                }
            },
        )?;
        info!(instance_id = id, reason = ?reason, "workflow instance cancelled");
        self.emit(LifecycleEvent::Cancelled {
            instance_id: cancelled.id.clone(),
            reason,
        });
        self.emit_ready(id, ready);
        Ok(cancelled)
    }

    fn admit(
        &self,
        registry: &InstanceRegistry,
        instance: &WorkflowInstance,
    ) -> Result<(), LifecycleError> {
        let running = registry.count_with_status(WorkflowStatus::Running);
        self.config
            .admission
            .check(running, registry.running_usage(), instance.resource_usage)
            .map_err(|reason| {
                warn!(instance_id = %instance.id, %reason, "admission rejected");
                LifecycleError::AdmissionRejected {
                    id: instance.id.clone(),
                    reason,
                }
            })
    }

    /// Check the source state, apply the change, and collect dependents that
    /// became ready if the new state is terminal.
    fn transition(
        &self,
        id: &str,
        action: &'static str,
        allowed: impl Fn(WorkflowStatus) -> bool,
        apply: impl FnOnce(&mut WorkflowInstance, DateTime<Utc>),
    ) -> Result<(WorkflowInstance, Vec<String>), LifecycleError> {
        let now = Utc::now();
        let mut registry = self.registry.write();
        let status = registry
            .get(id)
            .map(|i| i.status)
            .ok_or_else(|| LifecycleError::InstanceNotFound(id.to_string()))?;

        if !allowed(status) {
            debug!(instance_id = id, %status, action, "rejected transition");
            return Err(LifecycleError::InvalidTransition {
                id: id.to_string(),
                status,
                action,
            });
        }

        let updated = registry
            .update(id, |instance| {
                apply(instance, now);
                instance.updated_at = now;
                instance.clone()
            })
            .ok_or_else(|| LifecycleError::InstanceNotFound(id.to_string()))?;

        let ready = if updated.status.is_terminal() {
            ready_dependents(&registry, &updated)
        } else {
            Vec::new()
        };
        Ok((updated, ready))
    }

    fn emit_ready(&self, dependency_id: &str, ready: Vec<String>) {
        for instance_id in ready {
            debug!(instance_id = %instance_id, dependency_id, "dependent instance ready");
            self.emit(LifecycleEvent::DependentReady {
                instance_id,
                dependency_id: dependency_id.to_string(),
            });
        }
    }

    // ------------------------------------------------------------------
    // Dependency graph
    // ------------------------------------------------------------------

    /// Make `instance_id` wait on `depends_on`
    pub fn add_dependency(
        &self,
        instance_id: &str,
        depends_on: &str,
        condition: DependencyCondition,
        timeout: Option<Duration>,
    ) -> Result<(), LifecycleError> {
        let mut registry = self.registry.write();
        if !registry.contains(instance_id) {
            return Err(LifecycleError::InstanceNotFound(instance_id.to_string()));
        }
        let target = registry
            .get(depends_on)
            .ok_or_else(|| LifecycleError::InstanceNotFound(depends_on.to_string()))?;
        let (workflow_id, version) = (target.workflow_id.clone(), target.version.clone());

        if instance_id == depends_on || reaches(&registry, depends_on, instance_id) {
            return Err(LifecycleError::DependencyCycle {
                from: instance_id.to_string(),
                to: depends_on.to_string(),
            });
        }

        let duplicate = registry
            .get(instance_id)
            .is_some_and(|i| i.dependencies.iter().any(|d| d.instance_id == depends_on));
        if duplicate {
            return Err(LifecycleError::DuplicateDependency {
                from: instance_id.to_string(),
                to: depends_on.to_string(),
            });
        }

        let now = Utc::now();
        registry.update(instance_id, |instance| {
            instance.dependencies.push(WorkflowDependency {
                instance_id: depends_on.to_string(),
                workflow_id,
                version,
                condition,
                timeout,
                added_at: now,
            });
            instance.updated_at = now;
        });
        registry.update(depends_on, |target| {
            target.dependents.push(instance_id.to_string());
        });

        debug!(instance_id, depends_on, %condition, "dependency added");
        Ok(())
    }

    /// Remove the edge `instance_id -> depends_on`
    pub fn remove_dependency(
        &self,
        instance_id: &str,
        depends_on: &str,
    ) -> Result<(), LifecycleError> {
        let mut registry = self.registry.write();
        let removed = registry
            .update(instance_id, |instance| {
                let before = instance.dependencies.len();
                instance.dependencies.retain(|d| d.instance_id != depends_on);
                before != instance.dependencies.len()
            })
            .ok_or_else(|| LifecycleError::InstanceNotFound(instance_id.to_string()))?;

        if !removed {
            return Err(LifecycleError::DependencyNotFound {
                from: instance_id.to_string(),
                to: depends_on.to_string(),
            });
        }
        registry.update(depends_on, |target| {
            target.dependents.retain(|d| d != instance_id);
        });

        debug!(instance_id, depends_on, "dependency removed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Instance data
    // ------------------------------------------------------------------

    /// Register a cleanup task that instances may reference by id
    pub fn register_cleanup_task(&self, task_id: impl Into<String>, task: Arc<dyn CleanupTask>) {
        self.cleanup_tasks.write().insert(task_id.into(), task);
    }

    /// Attach a registered cleanup task to an instance
    pub fn add_cleanup_task(&self, instance_id: &str, task_id: &str) -> Result<(), LifecycleError> {
        if !self.cleanup_tasks.read().contains_key(task_id) {
            return Err(LifecycleError::UnknownCleanupTask(task_id.to_string()));
        }
        self.registry
            .write()
            .update(instance_id, |instance| {
                if !instance.cleanup_tasks.iter().any(|t| t == task_id) {
                    instance.cleanup_tasks.push(task_id.to_string());
                }
            })
            .ok_or_else(|| LifecycleError::InstanceNotFound(instance_id.to_string()))
    }

    pub fn update_resource_usage(
        &self,
        instance_id: &str,
        usage: ResourceUsage,
    ) -> Result<(), LifecycleError> {
        self.registry
            .write()
            .update(instance_id, |instance| instance.resource_usage = usage)
            .ok_or_else(|| LifecycleError::InstanceNotFound(instance_id.to_string()))
    }

    /// Record the execution host's id for an instance
    pub fn set_execution_id(
        &self,
        instance_id: &str,
        execution_id: impl Into<String>,
    ) -> Result<(), LifecycleError> {
        let execution_id = execution_id.into();
        self.registry
            .write()
            .update(instance_id, |instance| {
                instance.execution_id = Some(execution_id);
                instance.updated_at = Utc::now();
            })
            .ok_or_else(|| LifecycleError::InstanceNotFound(instance_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_instance(&self, id: &str) -> Option<WorkflowInstance> {
        self.registry.read().get(id).cloned()
    }

    /// Every instance, oldest first
    pub fn list_instances(&self) -> Vec<WorkflowInstance> {
        sorted(self.registry.read().values().cloned().collect())
    }

    pub fn instances_for_workflow(&self, workflow_id: &str) -> Vec<WorkflowInstance> {
        sorted(self.registry.read().for_workflow(workflow_id).cloned().collect())
    }

    pub fn instances_by_status(&self, status: WorkflowStatus) -> Vec<WorkflowInstance> {
        sorted(self.registry.read().with_status(status).cloned().collect())
    }

    pub fn running_count(&self) -> usize {
        self.registry
            .read()
            .count_with_status(WorkflowStatus::Running)
    }

    pub fn get_stats(&self) -> LifecycleStats {
        let registry = self.registry.read();
        let by_status = WorkflowStatus::ALL
            .into_iter()
            .map(|status| (status, registry.count_with_status(status)))
            .collect();

        let (sum_ms, completed) = registry
            .with_status(WorkflowStatus::Completed)
            .filter_map(WorkflowInstance::execution_time)
            .fold((0.0, 0u32), |(sum, n), d| {
                (sum + d.as_secs_f64() * 1000.0, n + 1)
            });

        let running = registry.count_with_status(WorkflowStatus::Running);
        LifecycleStats {
            total: registry.len(),
            by_status,
            average_execution_time_ms: (completed > 0).then(|| sum_ms / completed as f64),
            resource_utilization: self
                .config
                .admission
                .utilization(running, registry.running_usage()),
        }
    }

    // ------------------------------------------------------------------
    // Sweeps
    // ------------------------------------------------------------------

    /// Remove terminal instances idle longer than `max_workflow_duration`
    ///
    /// Cleanup tasks run first, outside the registry lock. Returns the number
    /// of removed instances.
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let max_age = self.config.max_workflow_duration;
        let expired: Vec<WorkflowInstance> = self
            .registry
            .read()
            .values()
            .filter(|i| i.status.is_terminal() && i.idle(now) > max_age)
            .cloned()
            .collect();

        let mut removed = 0;
        for instance in expired {
            self.run_cleanup_tasks(&instance).await;
            if self.remove_instance(&instance.id) {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "swept expired workflow instances");
        }
        removed
    }

    async fn run_cleanup_tasks(&self, instance: &WorkflowInstance) {
        for task_id in &instance.cleanup_tasks {
            let task = self.cleanup_tasks.read().get(task_id).cloned();
            let Some(task) = task else {
                warn!(instance_id = %instance.id, task_id = %task_id, "cleanup task no longer registered");
                continue;
            };
            if let Err(e) = task.run(instance).await {
                warn!(
                    instance_id = %instance.id,
                    task_id = %task_id,
                    error = %e,
                    "cleanup task failed"
                );
            }
        }
    }

    /// Remove an instance and drop its edges from neighbours
    fn remove_instance(&self, id: &str) -> bool {
        let removed = {
            let mut registry = self.registry.write();
            let Some(instance) = registry.remove(id) else {
                return false;
            };
            for dependency in &instance.dependencies {
                registry.update(&dependency.instance_id, |target| {
                    target.dependents.retain(|d| d != id);
                });
            }
            for dependent in &instance.dependents {
                registry.update(dependent, |waiting| {
                    waiting.dependencies.retain(|d| d.instance_id != id);
                });
            }
            instance
        };

        debug!(instance_id = id, status = %removed.status, "workflow instance removed");
        self.emit(LifecycleEvent::Removed {
            instance_id: removed.id,
        });
        true
    }

    /// Cancel RUNNING instances that exceeded `max_workflow_duration`
    ///
    /// Returns the ids of the cancelled instances. Only lifecycle state changes
    /// here; subscribers to `Cancelled` stop the underlying execution.
    pub fn cancel_stuck_workflows(&self) -> Vec<String> {
        let now = Utc::now();
        let max = self.config.max_workflow_duration;
        let stuck: Vec<String> = self
            .registry
            .read()
            .with_status(WorkflowStatus::Running)
            .filter(|i| i.elapsed(now) > max)
            .map(|i| i.id.clone())
            .collect();

        let reason = format!(
            "exceeded maximum workflow duration of {}ms",
            max.as_millis()
        );
        stuck
            .into_iter()
            .filter(|id| {
                match self.cancel_workflow(id, Some(reason.clone())) {
                    Ok(_) => {
                        warn!(instance_id = %id, "cancelled stuck workflow instance");
                        true
                    }
                    // raced with another transition
                    Err(e) => {
                        debug!(instance_id = %id, error = %e, "stuck instance already moved on");
                        false
                    }
                }
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Background loops
    // ------------------------------------------------------------------

    /// Start the cleanup and status-update loops
    pub fn start(self: &Arc<Self>) {
        let mut handles = self.loop_handles.lock();
        if !handles.is_empty() {
            debug!("lifecycle loops already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        handles.push(spawn_loop(
            Arc::downgrade(self),
            self.config.cleanup_interval,
            shutdown_rx.clone(),
            "cleanup",
            |manager| async move {
                manager.cleanup_expired().await;
            },
        ));
        handles.push(spawn_loop(
            Arc::downgrade(self),
            self.config.status_update_interval,
            shutdown_rx,
            "status-update",
            |manager| async move {
                manager.cancel_stuck_workflows();
            },
        ));

        info!(
            cleanup_interval_ms = self.config.cleanup_interval.as_millis() as u64,
            status_update_interval_ms = self.config.status_update_interval.as_millis() as u64,
            "lifecycle manager started"
        );
    }

    /// Stop the background loops and wait for them to exit
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(true);
        }
        let handles: Vec<_> = std::mem::take(&mut *self.loop_handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "lifecycle loop ended abnormally");
            }
        }
        info!("lifecycle manager stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.loop_handles.lock().is_empty()
    }
}

fn spawn_loop<F, Fut>(
    manager: Weak<LifecycleManager>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    name: &'static str,
    tick: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<LifecycleManager>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(manager) = manager.upgrade() else {
                        break;
                    };
                    tick(manager).await;
                }
                _ = shutdown_rx.changed() => {
                    debug!(loop_name = name, "shutdown requested");
                    break;
                }
            }
        }

        debug!(loop_name = name, "lifecycle loop exited");
    })
}

/// Pending dependents of `instance` whose dependencies are now all satisfied
fn ready_dependents(registry: &InstanceRegistry, instance: &WorkflowInstance) -> Vec<String> {
    instance
        .dependents
        .iter()
        .filter(|id| {
            registry.get(id).is_some_and(|waiting| {
                waiting.status == WorkflowStatus::Pending
                    && waiting.dependencies.iter().all(|dep| {
                        registry
                            .get(&dep.instance_id)
                            .map_or(true, |target| dep.condition.is_satisfied_by(target.status))
                    })
            })
        })
        .cloned()
        .collect()
}

/// Whether `to` is reachable from `from` along dependency edges
fn reaches(registry: &InstanceRegistry, from: &str, to: &str) -> bool {
    let mut stack = vec![from.to_string()];
    let mut seen = HashSet::new();
    while let Some(id) = stack.pop() {
        if id == to {
            return true;
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(instance) = registry.get(&id) {
            stack.extend(instance.dependencies.iter().map(|d| d.instance_id.clone()));
        }
    }
    false
}

fn sorted(mut instances: Vec<WorkflowInstance>) -> Vec<WorkflowInstance> {
    instances.sort_by(|a, b| a.id.cmp(&b.id));
    instances
}
