//! Shapes returned to the API layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::definition::WorkflowInfo;
use crate::collaborators::SecurityStats;
use crate::lifecycle::{DeleteResult, LifecycleStats, WorkflowInstance, WorkflowStatus};
use crate::reliability::{CircuitBreakerSnapshot, ErrorSummary};
use crate::scheduler::ScheduleStats;

/// Result of an instance or schedule mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    pub success: bool,
    pub message: String,
}

impl MutationResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl<E: std::fmt::Display> From<Result<String, E>> for MutationResult {
    fn from(result: Result<String, E>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedCount {
    pub deleted_count: u64,
}

/// Result of a history deletion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMutationResult {
    pub success: bool,
    pub message: String,
    pub data: DeletedCount,
}

impl From<DeleteResult> for HistoryMutationResult {
    fn from(result: DeleteResult) -> Self {
        Self {
            success: result.success,
            message: result.message,
            data: DeletedCount {
                deleted_count: result.deleted_count,
            },
        }
    }
}

/// Whether a definition is enabled by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefinitionStatus {
    Active,
    Inactive,
}

/// One entry of the workflow registry listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    #[serde(flatten)]
    pub info: WorkflowInfo,
    pub status: DefinitionStatus,
    /// Has at least one unfinished instance
    pub is_active: bool,
    pub active_instances: usize,
    pub total_instances: usize,
    pub schedules: usize,
}

/// Registry listing filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFilter {
    pub namespace: Option<String>,
    /// Every listed tag must be present
    #[serde(default)]
    pub tags: Vec<String>,
    pub status: Option<DefinitionStatus>,
    pub author: Option<String>,
    pub is_active: Option<bool>,
}

impl WorkflowFilter {
    pub fn matches(&self, summary: &WorkflowSummary) -> bool {
        let info = &summary.info;
        self.namespace.as_ref().map_or(true, |ns| &info.namespace == ns)
            && self.tags.iter().all(|tag| info.tags.contains(tag))
            && self.status.map_or(true, |status| summary.status == status)
            && self
                .author
                .as_ref()
                .map_or(true, |author| info.author.as_ref() == Some(author))
            && self.is_active.map_or(true, |active| summary.is_active == active)
    }
}

/// Instance listing filter; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceFilter {
    /// Case-insensitive substring of the workflow name
    pub name: Option<String>,
    pub namespace: Option<String>,
    #[serde(default)]
    pub statuses: Vec<WorkflowStatus>,
    pub created_by: Option<String>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &WorkflowInstance) -> bool {
        let (namespace, name) = instance
            .workflow_id
            .split_once('.')
            .unwrap_or(("", instance.workflow_id.as_str()));

        self.name
            .as_ref()
            .map_or(true, |n| name.to_lowercase().contains(&n.to_lowercase()))
            && self.namespace.as_ref().map_or(true, |ns| namespace == ns)
            && (self.statuses.is_empty() || self.statuses.contains(&instance.status))
            && self.created_by.as_ref().map_or(true, |user| {
                instance.metadata.get("created_by").and_then(|v| v.as_str()) == Some(user)
            })
            && self
                .started_after
                .map_or(true, |after| instance.started_at >= after)
            && self
                .started_before
                .map_or(true, |before| instance.started_at <= before)
    }
}

/// Snapshot of the whole orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub initialized: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime_ms: Option<u64>,
    pub registered_workflows: usize,
    pub lifecycle: LifecycleStats,
    pub schedules: ScheduleStats,
    pub errors: ErrorSummary,
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,
    pub security: SecurityStats,
    pub configuration_issues: usize,
}
