//! In-memory implementation of HistoryStore

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::query::{HistoryQuery, PageRequest};
use super::record::{ExecutionRecord, ExecutionStatus};
use super::store::{DefinitionStats, HistoryError, HistoryStore};

/// In-memory implementation of [`HistoryStore`]
///
/// Used by tests and by the standalone binary. Provides the same semantics a
/// document-store backend would.
///
/// # Example
///
/// ```
/// use workflow_orchestrator::InMemoryHistoryStore;
///
/// let store = InMemoryHistoryStore::new();
/// assert_eq!(store.len(), 0);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    records: RwLock<HashMap<String, ExecutionRecord>>,
    closed: AtomicBool,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn ensure_open(&self) -> Result<(), HistoryError> {
        if self.closed.load(Ordering::Acquire) {
            Err(HistoryError::Closed)
        } else {
            Ok(())
        }
    }
}

fn mean_duration_ms<'a>(records: impl Iterator<Item = &'a ExecutionRecord>) -> Option<f64> {
    let (sum, n) = records
        .filter_map(ExecutionRecord::duration)
        .fold((0.0, 0u64), |(sum, n), d| (sum + d.as_secs_f64() * 1000.0, n + 1));
    (n > 0).then(|| sum / n as f64)
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn save(&self, record: ExecutionRecord) -> Result<(), HistoryError> {
        self.ensure_open()?;
        self.records.write().insert(record.id.clone(), record);
        Ok(())
    }

    async fn find(
        &self,
        query: &HistoryQuery,
        page: &PageRequest,
    ) -> Result<Vec<ExecutionRecord>, HistoryError> {
        self.ensure_open()?;
        let records = self.records.read();
        let mut matched: Vec<&ExecutionRecord> =
            records.values().filter(|r| query.matches(r)).collect();
        matched.sort_by(|a, b| page.compare(a, b));
        Ok(matched
            .into_iter()
            .skip(page.offset())
            .take(page.limit as usize)
            .cloned()
            .collect())
    }

    async fn count(&self, query: &HistoryQuery) -> Result<u64, HistoryError> {
        self.ensure_open()?;
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| query.matches(r))
            .count() as u64)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<ExecutionRecord>, HistoryError> {
        self.ensure_open()?;
        Ok(self.records.read().get(id).cloned())
    }

    async fn count_by_status(
        &self,
        query: &HistoryQuery,
    ) -> Result<HashMap<ExecutionStatus, u64>, HistoryError> {
        self.ensure_open()?;
        let mut counts = HashMap::new();
        for record in self.records.read().values().filter(|r| query.matches(r)) {
            *counts.entry(record.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn average_duration_ms(
        &self,
        query: &HistoryQuery,
    ) -> Result<Option<f64>, HistoryError> {
        self.ensure_open()?;
        let records = self.records.read();
        Ok(mean_duration_ms(
            records.values().filter(|r| query.matches(r)),
        ))
    }

    async fn definition_breakdown(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<DefinitionStats>, HistoryError> {
        self.ensure_open()?;
        let records = self.records.read();
        let mut grouped: BTreeMap<&str, Vec<&ExecutionRecord>> = BTreeMap::new();
        for record in records.values().filter(|r| query.matches(r)) {
            grouped
                .entry(record.workflow_definition_id.as_str())
                .or_default()
                .push(record);
        }

        Ok(grouped
            .into_iter()
            .map(|(definition_id, group)| {
                let mut by_status = HashMap::new();
                for record in &group {
                    *by_status.entry(record.status).or_insert(0) += 1;
                }
                DefinitionStats {
                    workflow_definition_id: definition_id.to_string(),
                    total: group.len() as u64,
                    by_status,
                    average_duration_ms: mean_duration_ms(group.iter().copied()),
                }
            })
            .collect())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<u64, HistoryError> {
        self.ensure_open()?;
        let mut records = self.records.write();
        Ok(ids.iter().filter(|id| records.remove(*id).is_some()).count() as u64)
    }

    async fn delete_by_definition(&self, definition_id: &str) -> Result<u64, HistoryError> {
        self.ensure_open()?;
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, r| r.workflow_definition_id != definition_id);
        Ok((before - records.len()) as u64)
    }

    async fn close(&self) -> Result<(), HistoryError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
