//! Read/delete façade over the durable execution history
//!
//! These methods read the [`HistoryStore`](crate::history::HistoryStore),
//! never the in-memory registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::LifecycleError;
use super::manager::LifecycleManager;
use crate::history::{
    DefinitionStats, ExecutionRecord, ExecutionStatus, HistoryError, HistoryFilter, HistoryQuery,
    Page, PageInfo, PageRequest, SortField, SortOrder,
};

/// Outcome of a history deletion
///
/// Deletions never fail with an error; store failures are reported here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub success: bool,
    pub deleted_count: u64,
    pub message: String,
}

impl DeleteResult {
    fn ok(deleted_count: u64, message: String) -> Self {
        Self {
            success: true,
            deleted_count,
            message,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            deleted_count: 0,
            message,
        }
    }
}

/// Aggregate statistics over persisted executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: u64,
    pub by_status: BTreeMap<ExecutionStatus, u64>,
    pub average_duration_ms: Option<f64>,
    pub definitions: Vec<DefinitionStats>,
}

impl LifecycleManager {
    /// Filtered, paginated history query
    pub async fn query_history(
        &self,
        filter: &HistoryFilter,
        page: PageRequest,
    ) -> Result<Page<ExecutionRecord>, LifecycleError> {
        let query = filter.compile()?;
        self.page_of(&query, page.normalized()).await
    }

    async fn page_of(
        &self,
        query: &HistoryQuery,
        page: PageRequest,
    ) -> Result<Page<ExecutionRecord>, LifecycleError> {
        let total = self.history.count(query).await?;
        let items = self.history.find(query, &page).await?;
        Ok(Page {
            items,
            page_info: PageInfo::new(&page, total),
        })
    }

    /// One execution by id; missing ids are an error
    pub async fn get_execution(&self, id: &str) -> Result<ExecutionRecord, LifecycleError> {
        self.history
            .find_by_id(id)
            .await?
            .ok_or_else(|| HistoryError::NotFound(id.to_string()).into())
    }

    /// Executions of one definition (exact id)
    pub async fn executions_for_definition(
        &self,
        definition_id: &str,
        page: PageRequest,
    ) -> Result<Page<ExecutionRecord>, LifecycleError> {
        self.page_of(&HistoryQuery::for_definition(definition_id), page.normalized())
            .await
    }

    /// Executions in any of `statuses`
    pub async fn executions_by_status(
        &self,
        statuses: &[ExecutionStatus],
        page: PageRequest,
    ) -> Result<Page<ExecutionRecord>, LifecycleError> {
        let query = HistoryQuery::all().with_statuses(statuses.to_vec());
        self.page_of(&query, page.normalized()).await
    }

    /// Case-insensitive text search over id, description and definition id
    pub async fn search_history(
        &self,
        text: &str,
        page: PageRequest,
    ) -> Result<Page<ExecutionRecord>, LifecycleError> {
        self.query_history(&HistoryFilter::new().with_search(text), page)
            .await
    }

    /// The `limit` most recently created executions
    pub async fn recent_executions(
        &self,
        limit: u32,
    ) -> Result<Vec<ExecutionRecord>, LifecycleError> {
        let page = PageRequest::new(1, limit).sorted_by(SortField::CreateTime, SortOrder::Desc);
        Ok(self.history.find(&HistoryQuery::all(), &page).await?)
    }

    /// Counts per status, average completion time and per-definition breakdown
    pub async fn history_stats(
        &self,
        filter: Option<&HistoryFilter>,
    ) -> Result<HistoryStats, LifecycleError> {
        let query = match filter {
            Some(filter) => filter.compile()?,
            None => HistoryQuery::all(),
        };

        let counts = self.history.count_by_status(&query).await?;
        let by_status: BTreeMap<_, _> = ExecutionStatus::ALL
            .into_iter()
            .map(|status| (status, counts.get(&status).copied().unwrap_or(0)))
            .collect();

        Ok(HistoryStats {
            total: by_status.values().sum(),
            by_status,
            average_duration_ms: self.history.average_duration_ms(&query).await?,
            definitions: self.history.definition_breakdown(&query).await?,
        })
    }

    /// Delete one execution
    pub async fn delete_workflow_history(&self, id: &str) -> DeleteResult {
        match self.history.delete_by_ids(&[id.to_string()]).await {
            Ok(0) => {
                debug!(execution_id = id, "no execution to delete");
                DeleteResult::failed(format!("no execution found with id {id}"))
            }
            Ok(n) => DeleteResult::ok(n, format!("deleted execution {id}")),
            Err(e) => {
                warn!(execution_id = id, error = %e, "history deletion failed");
                DeleteResult::failed(e.to_string())
            }
        }
    }

    /// Delete a batch of executions; succeeds if at least one existed
    pub async fn delete_workflow_histories(&self, ids: &[String]) -> DeleteResult {
        if ids.is_empty() {
            return DeleteResult::failed("no execution ids given".to_string());
        }
        match self.history.delete_by_ids(ids).await {
            Ok(0) => DeleteResult::failed(format!("none of the {} executions exist", ids.len())),
            Ok(n) => DeleteResult::ok(n, format!("deleted {n} of {} executions", ids.len())),
            Err(e) => {
                warn!(requested = ids.len(), error = %e, "batch history deletion failed");
                DeleteResult::failed(e.to_string())
            }
        }
    }

    /// Delete every execution of a definition; zero matches is a success
    pub async fn clear_definition_history(&self, definition_id: &str) -> DeleteResult {
        match self.history.delete_by_definition(definition_id).await {
            Ok(n) => DeleteResult::ok(
                n,
                format!("deleted {n} executions of {definition_id}"),
            ),
            Err(e) => {
                warn!(definition_id, error = %e, "history clear failed");
                DeleteResult::failed(e.to_string())
            }
        }
    }
}
