//! Persisted execution-history records

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status code of a persisted execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExecutionStatus {
    Pending,
    Runnable,
    Complete,
    Terminated,
    Suspended,
}

impl ExecutionStatus {
    pub const ALL: [ExecutionStatus; 5] = [
        Self::Pending,
        Self::Runnable,
        Self::Complete,
        Self::Terminated,
        Self::Suspended,
    ];

    /// Whether the execution has finished (successfully or not)
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Runnable => "RUNNABLE",
            Self::Complete => "COMPLETE",
            Self::Terminated => "TERMINATED",
            Self::Suspended => "SUSPENDED",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown execution status: {s}"))
    }
}

/// Status of a single step pointer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PointerStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Cancelled,
}

/// Persisted record of one step's execution within an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPointer {
    pub id: String,
    pub step_id: u32,
    pub step_name: Option<String>,
    pub status: PointerStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub active: bool,
}

impl ExecutionPointer {
    /// New active pointer for step `step_id`, started now
    pub fn start(step_id: u32, step_name: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            step_id,
            step_name,
            status: PointerStatus::Running,
            start_time: Some(Utc::now()),
            end_time: None,
            retry_count: 0,
            active: true,
        }
    }

    /// Close the pointer with a final status
    pub fn finish(&mut self, status: PointerStatus) {
        self.status = status;
        self.end_time = Some(Utc::now());
        self.active = false;
    }
}

/// Durable record of a workflow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub workflow_definition_id: String,
    pub version: u32,
    pub description: Option<String>,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub data: serde_json::Value,
    pub create_time: DateTime<Utc>,
    pub complete_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_pointers: Vec<ExecutionPointer>,
}

impl ExecutionRecord {
    /// New RUNNABLE record with a time-ordered id
    pub fn new(
        workflow_definition_id: impl Into<String>,
        version: u32,
        data: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            workflow_definition_id: workflow_definition_id.into(),
            version,
            description: None,
            status: ExecutionStatus::Runnable,
            data,
            create_time: Utc::now(),
            complete_time: None,
            execution_pointers: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_create_time(mut self, create_time: DateTime<Utc>) -> Self {
        self.create_time = create_time;
        self
    }

    /// Mark the record finished with a terminal status
    pub fn finish(&mut self, status: ExecutionStatus, data: Option<serde_json::Value>) {
        self.status = status;
        self.complete_time = Some(Utc::now());
        if let Some(data) = data {
            self.data = data;
        }
        let pointer_status = if status == ExecutionStatus::Complete {
            PointerStatus::Complete
        } else {
            PointerStatus::Failed
        };
        for pointer in self.execution_pointers.iter_mut().filter(|p| p.active) {
            pointer.finish(pointer_status);
        }
    }

    /// Wall-clock time between creation and completion
    pub fn duration(&self) -> Option<Duration> {
        self.complete_time
            .and_then(|done| done.signed_duration_since(self.create_time).to_std().ok())
    }
}
