//! Cleanup tasks run before a terminal instance is removed

use async_trait::async_trait;

use super::instance::WorkflowInstance;

/// A unit of cleanup work, registered once and referenced by id from instances
///
/// Failures are logged by the sweep and never prevent removal.
#[async_trait]
pub trait CleanupTask: Send + Sync + 'static {
    async fn run(&self, instance: &WorkflowInstance) -> anyhow::Result<()>;
}
