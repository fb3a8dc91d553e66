//! Workflow instance model

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    /// Created, waiting for admission
    Pending,

    /// Admitted and executing
    Running,

    /// Suspended by an operator
    Paused,

    /// Finished successfully
    Completed,

    /// Finished with an error
    Failed,

    /// Stopped before finishing
    Cancelled,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 6] = [
        Self::Pending,
        Self::Running,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Condition a dependency must reach before the dependent may start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyCondition {
    #[default]
    Completed,
    Failed,
    /// Any terminal status
    Any,
}

impl DependencyCondition {
    pub fn is_satisfied_by(self, status: WorkflowStatus) -> bool {
        match self {
            Self::Completed => status == WorkflowStatus::Completed,
            Self::Failed => status == WorkflowStatus::Failed,
            Self::Any => status.is_terminal(),
        }
    }
}

impl std::fmt::Display for DependencyCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// Edge from a dependent instance to the instance it waits on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDependency {
    /// Referenced instance
    pub instance_id: String,
    pub workflow_id: String,
    pub version: String,
    pub condition: DependencyCondition,

    /// Give up waiting after this long
    #[serde(default, with = "crate::duration_millis::option")]
    pub timeout: Option<Duration>,

    pub added_at: DateTime<Utc>,
}

impl WorkflowDependency {
    /// Whether the wait has exceeded the timeout at `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(timeout) = self.timeout else {
            return false;
        };
        now.signed_duration_since(self.added_at)
            .to_std()
            .map(|waited| waited > timeout)
            .unwrap_or(false)
    }
}

/// Resource usage snapshot of an instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_mb: f64,
    pub cpu_percent: f64,
    pub disk_mb: f64,
}

impl ResourceUsage {
    pub fn new(memory_mb: f64, cpu_percent: f64, disk_mb: f64) -> Self {
        Self {
            memory_mb,
            cpu_percent,
            disk_mb,
        }
    }
}

impl std::ops::Add for ResourceUsage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            memory_mb: self.memory_mb + rhs.memory_mb,
            cpu_percent: self.cpu_percent + rhs.cpu_percent,
            disk_mb: self.disk_mb + rhs.disk_mb,
        }
    }
}

impl std::iter::Sum for ResourceUsage {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |acc, usage| acc + usage)
    }
}

/// Options for creating an instance
#[derive(Debug, Clone, Default)]
pub struct InstanceOptions {
    pub priority: i32,
    pub input: serde_json::Value,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub resource_usage: ResourceUsage,
}

impl InstanceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_resource_usage(mut self, usage: ResourceUsage) -> Self {
        self.resource_usage = usage;
        self
    }
}

/// One tracked run of a workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: String,
    pub workflow_id: String,
    pub version: String,
    pub status: WorkflowStatus,
    pub priority: i32,
    pub input: serde_json::Value,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resumed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub error: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,

    /// Instances this one waits on
    pub dependencies: Vec<WorkflowDependency>,

    /// Instances waiting on this one
    pub dependents: Vec<String>,

    /// Registered cleanup task ids, run before removal
    pub cleanup_tasks: Vec<String>,

    pub resource_usage: ResourceUsage,

    /// Execution id assigned by the execution host, once started
    pub execution_id: Option<String>,
}

impl WorkflowInstance {
    pub(crate) fn new(workflow_id: &str, version: &str, options: InstanceOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            workflow_id: workflow_id.to_string(),
            version: version.to_string(),
            status: WorkflowStatus::Pending,
            priority: options.priority,
            input: options.input,
            started_at: now,
            updated_at: now,
            completed_at: None,
            paused_at: None,
            resumed_at: None,
            cancelled_at: None,
            error: None,
            metadata: options.metadata,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            cleanup_tasks: Vec::new(),
            resource_usage: options.resource_usage,
            execution_id: None,
        }
    }

    /// Time spent since the instance started (or was created)
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Time since the last transition
    pub fn idle(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.updated_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Wall-clock execution time of a completed instance
    pub fn execution_time(&self) -> Option<Duration> {
        self.completed_at
            .and_then(|done| done.signed_duration_since(self.started_at).to_std().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_flags() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(WorkflowStatus::Paused.is_active());
        assert_eq!(WorkflowStatus::Paused.to_string(), "PAUSED");
        assert_eq!(
            serde_json::to_string(&WorkflowStatus::Running).unwrap(),
            "\"RUNNING\""
        );
    }

    #[test]
    fn test_dependency_conditions() {
        use WorkflowStatus::*;
        assert!(DependencyCondition::Completed.is_satisfied_by(Completed));
        assert!(!DependencyCondition::Completed.is_satisfied_by(Failed));
        assert!(DependencyCondition::Failed.is_satisfied_by(Failed));
        assert!(DependencyCondition::Any.is_satisfied_by(Cancelled));
        assert!(!DependencyCondition::Any.is_satisfied_by(Running));
    }

    #[test]
    fn test_dependency_expiry() {
        let dep = WorkflowDependency {
            instance_id: "a".into(),
            workflow_id: "core.A".into(),
            version: "1".into(),
            condition: DependencyCondition::Completed,
            timeout: Some(Duration::from_secs(60)),
            added_at: Utc::now() - chrono::Duration::minutes(2),
        };
        assert!(dep.is_expired(Utc::now()));
        assert!(!WorkflowDependency { timeout: None, ..dep }.is_expired(Utc::now()));
    }

    #[test]
    fn test_resource_usage_sum() {
        let total: ResourceUsage = [
            ResourceUsage::new(100.0, 10.0, 5.0),
            ResourceUsage::new(50.0, 5.0, 1.0),
        ]
        .into_iter()
        .sum();
        assert_eq!(total, ResourceUsage::new(150.0, 15.0, 6.0));
    }
}
