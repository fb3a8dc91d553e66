//! HistoryStore trait definition

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::query::{HistoryQuery, PageRequest};
use super::record::{ExecutionRecord, ExecutionStatus};

/// Error type for history operations
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// Execution not found
    #[error("execution not found: {0}")]
    NotFound(String),

    /// Filter could not be compiled
    #[error("invalid history filter: {0}")]
    InvalidFilter(String),

    /// Backend failure
    #[error("history store error: {0}")]
    Store(String),

    /// The store has been closed
    #[error("history store is closed")]
    Closed,
}

/// Per-definition aggregate over the history store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionStats {
    pub workflow_definition_id: String,
    pub total: u64,
    pub by_status: HashMap<ExecutionStatus, u64>,
    pub average_duration_ms: Option<f64>,
}

/// Durable execution-history repository
///
/// Append, read and delete only; records are never mutated in place by the
/// lifecycle layer. Implementations must be thread-safe.
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Insert or replace a record by id
    async fn save(&self, record: ExecutionRecord) -> Result<(), HistoryError>;

    /// Filtered, sorted, paginated read
    async fn find(
        &self,
        query: &HistoryQuery,
        page: &PageRequest,
    ) -> Result<Vec<ExecutionRecord>, HistoryError>;

    /// Number of records matching `query`
    async fn count(&self, query: &HistoryQuery) -> Result<u64, HistoryError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<ExecutionRecord>, HistoryError>;

    /// Counts grouped by status
    async fn count_by_status(
        &self,
        query: &HistoryQuery,
    ) -> Result<HashMap<ExecutionStatus, u64>, HistoryError>;

    /// Mean create-to-complete time of finished records, in milliseconds
    async fn average_duration_ms(&self, query: &HistoryQuery)
        -> Result<Option<f64>, HistoryError>;

    /// Aggregates of records matching `query`, grouped and sorted by definition id
    async fn definition_breakdown(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<DefinitionStats>, HistoryError>;

    /// Delete the given ids; returns how many existed
    async fn delete_by_ids(&self, ids: &[String]) -> Result<u64, HistoryError>;

    /// Delete every record of a definition; returns how many existed
    async fn delete_by_definition(&self, definition_id: &str) -> Result<u64, HistoryError>;

    /// Release the backend; later calls fail with [`HistoryError::Closed`]
    async fn close(&self) -> Result<(), HistoryError>;
}
