//! Lifecycle notifications

use serde::{Deserialize, Serialize};

/// Event published on every accepted transition
///
/// Delivered over a broadcast channel after the registry has been updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Created {
        instance_id: String,
        workflow_id: String,
    },
    Started {
        instance_id: String,
        workflow_id: String,
    },
    Paused {
        instance_id: String,
    },
    Resumed {
        instance_id: String,
    },
    Completed {
        instance_id: String,
        workflow_id: String,
    },
    Failed {
        instance_id: String,
        workflow_id: String,
        error: String,
    },
    Cancelled {
        instance_id: String,
        reason: Option<String>,
    },
    Removed {
        instance_id: String,
    },
    /// All dependencies of `instance_id` are now satisfied
    DependentReady {
        instance_id: String,
        dependency_id: String,
    },
}

impl LifecycleEvent {
    pub fn instance_id(&self) -> &str {
        match self {
            Self::Created { instance_id, .. }
            | Self::Started { instance_id, .. }
            | Self::Paused { instance_id }
            | Self::Resumed { instance_id }
            | Self::Completed { instance_id, .. }
            | Self::Failed { instance_id, .. }
            | Self::Cancelled { instance_id, .. }
            | Self::Removed { instance_id }
            | Self::DependentReady { instance_id, .. } => instance_id,
        }
    }
}
