//! Indexed in-memory instance registry

use std::collections::{BTreeSet, HashMap};

use super::instance::{ResourceUsage, WorkflowInstance, WorkflowStatus};

/// Instances keyed by id with secondary indexes by workflow id and status
///
/// Callers mutate instances through [`InstanceRegistry::update`], which keeps
/// the status index consistent.
#[derive(Debug, Default)]
pub(crate) struct InstanceRegistry {
    instances: HashMap<String, WorkflowInstance>,
    by_workflow: HashMap<String, BTreeSet<String>>,
    by_status: HashMap<WorkflowStatus, BTreeSet<String>>,
}

impl InstanceRegistry {
    pub(crate) fn insert(&mut self, instance: WorkflowInstance) {
        self.by_workflow
            .entry(instance.workflow_id.clone())
            .or_default()
            .insert(instance.id.clone());
        self.by_status
            .entry(instance.status)
            .or_default()
            .insert(instance.id.clone());
        self.instances.insert(instance.id.clone(), instance);
    }

    pub(crate) fn get(&self, id: &str) -> Option<&WorkflowInstance> {
        self.instances.get(id)
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.instances.len()
    }

    /// Apply `f` to an instance, reindexing if its status changed
    pub(crate) fn update<R>(
        &mut self,
        id: &str,
        f: impl FnOnce(&mut WorkflowInstance) -> R,
    ) -> Option<R> {
        let instance = self.instances.get_mut(id)?;
        let before = instance.status;
        let result = f(instance);
        let after = instance.status;

        if before != after {
            if let Some(ids) = self.by_status.get_mut(&before) {
                ids.remove(id);
            }
            self.by_status
                .entry(after)
                .or_default()
                .insert(id.to_string());
        }
        Some(result)
    }

    pub(crate) fn remove(&mut self, id: &str) -> Option<WorkflowInstance> {
        let instance = self.instances.remove(id)?;
        if let Some(ids) = self.by_workflow.get_mut(&instance.workflow_id) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_workflow.remove(&instance.workflow_id);
            }
        }
        if let Some(ids) = self.by_status.get_mut(&instance.status) {
            ids.remove(id);
        }
        Some(instance)
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &WorkflowInstance> {
        self.instances.values()
    }

    pub(crate) fn with_status(
        &self,
        status: WorkflowStatus,
    ) -> impl Iterator<Item = &WorkflowInstance> {
        self.by_status
            .get(&status)
            .into_iter()
            .flatten()
            .filter_map(|id| self.instances.get(id))
    }

    pub(crate) fn count_with_status(&self, status: WorkflowStatus) -> usize {
        self.by_status.get(&status).map_or(0, BTreeSet::len)
    }

    pub(crate) fn for_workflow(&self, workflow_id: &str) -> impl Iterator<Item = &WorkflowInstance> {
        self.by_workflow
            .get(workflow_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.instances.get(id))
    }

    /// Aggregate usage of RUNNING instances
    pub(crate) fn running_usage(&self) -> ResourceUsage {
        self.with_status(WorkflowStatus::Running)
            .map(|i| i.resource_usage)
            .sum()
    }
}
