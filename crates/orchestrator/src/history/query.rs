//! History filters, compiled queries and pagination

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::record::{ExecutionRecord, ExecutionStatus};
use super::store::HistoryError;

/// Largest page a caller may request
pub const MAX_PAGE_LIMIT: u32 = 500;

/// Caller-facing history filter
///
/// `definition_id` accepts glob patterns (`*`, `?`) and matches anywhere in
/// the definition id, ignoring case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryFilter {
    pub definition_id: Option<String>,
    #[serde(default)]
    pub statuses: Vec<ExecutionStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub completed_after: Option<DateTime<Utc>>,
    pub completed_before: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

impl HistoryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definition_id(mut self, pattern: impl Into<String>) -> Self {
        self.definition_id = Some(pattern.into());
        self
    }

    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        if !self.statuses.contains(&status) {
            self.statuses.push(status);
        }
        self
    }

    pub fn with_created_range(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    pub fn with_completed_range(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.completed_after = after;
        self.completed_before = before;
        self
    }

    pub fn with_search(mut self, text: impl Into<String>) -> Self {
        self.search = Some(text.into());
        self
    }

    /// Compile into a query a store can evaluate
    pub fn compile(&self) -> Result<HistoryQuery, HistoryError> {
        let definition = self
            .definition_id
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(glob_to_regex)
            .transpose()?;

        if let (Some(after), Some(before)) = (self.created_after, self.created_before) {
            if after > before {
                return Err(HistoryError::InvalidFilter(
                    "created_after is later than created_before".to_string(),
                ));
            }
        }
        if let (Some(after), Some(before)) = (self.completed_after, self.completed_before) {
            if after > before {
                return Err(HistoryError::InvalidFilter(
                    "completed_after is later than completed_before".to_string(),
                ));
            }
        }

        Ok(HistoryQuery {
            definition,
            statuses: self.statuses.clone(),
            created_after: self.created_after,
            created_before: self.created_before,
            completed_after: self.completed_after,
            completed_before: self.completed_before,
            search: self
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase),
        })
    }
}

fn glob_to_regex(pattern: &str) -> Result<Regex, HistoryError> {
    let mut source = String::with_capacity(pattern.len() * 2);
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    RegexBuilder::new(&source)
        .case_insensitive(true)
        .build()
        .map_err(|e| HistoryError::InvalidFilter(format!("definition id pattern: {e}")))
}

/// Compiled filter evaluated against execution records
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    definition: Option<Regex>,
    statuses: Vec<ExecutionStatus>,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
    completed_after: Option<DateTime<Utc>>,
    completed_before: Option<DateTime<Utc>>,
    search: Option<String>,
}

impl HistoryQuery {
    /// Query matching every record
    pub fn all() -> Self {
        Self::default()
    }

    /// Records whose definition id equals `definition_id` exactly
    pub fn for_definition(definition_id: &str) -> Self {
        Self {
            definition: Regex::new(&format!("^{}$", regex::escape(definition_id))).ok(),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: Vec<ExecutionStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn matches(&self, record: &ExecutionRecord) -> bool {
        if let Some(re) = &self.definition {
            if !re.is_match(&record.workflow_definition_id) {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&record.status) {
            return false;
        }
        if self.created_after.is_some_and(|t| record.create_time < t)
            || self.created_before.is_some_and(|t| record.create_time > t)
        {
            return false;
        }
        if self.completed_after.is_some() || self.completed_before.is_some() {
            let Some(done) = record.complete_time else {
                return false;
            };
            if self.completed_after.is_some_and(|t| done < t)
                || self.completed_before.is_some_and(|t| done > t)
            {
                return false;
            }
        }
        if let Some(text) = &self.search {
            let hit = record.id.to_lowercase().contains(text)
                || record.workflow_definition_id.to_lowercase().contains(text)
                || record
                    .description
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(text));
            if !hit {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreateTime,
    CompleteTime,
    WorkflowDefinitionId,
    Status,
    Version,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Page request (1-based page number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
    #[serde(default)]
    pub sort_field: SortField,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 20,
            sort_field: SortField::default(),
            sort_order: SortOrder::default(),
        }
    }
}

impl PageRequest {
    /// Page request with `page >= 1` and `limit` clamped to `1..=500`
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
            ..Self::default()
        }
    }

    pub fn sorted_by(mut self, field: SortField, order: SortOrder) -> Self {
        self.sort_field = field;
        self.sort_order = order;
        self
    }

    /// Normalized copy, for requests built from untrusted input
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, MAX_PAGE_LIMIT),
            ..self
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit as usize
    }

    /// Total ordering over records for this request; ties break on id
    pub fn compare(&self, a: &ExecutionRecord, b: &ExecutionRecord) -> Ordering {
        let primary = match self.sort_field {
            SortField::CreateTime => a.create_time.cmp(&b.create_time),
            SortField::CompleteTime => a.complete_time.cmp(&b.complete_time),
            SortField::WorkflowDefinitionId => {
                a.workflow_definition_id.cmp(&b.workflow_definition_id)
            }
            SortField::Status => a.status.cmp(&b.status),
            SortField::Version => a.version.cmp(&b.version),
        };
        let primary = match self.sort_order {
            SortOrder::Asc => primary,
            SortOrder::Desc => primary.reverse(),
        };
        primary.then_with(|| a.id.cmp(&b.id))
    }
}

/// Pagination metadata returned with every page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl PageInfo {
    pub fn new(request: &PageRequest, total: u64) -> Self {
        let limit = request.limit.max(1) as u64;
        let pages = total.div_ceil(limit).min(u32::MAX as u64) as u32;
        Self {
            page: request.page,
            limit: request.limit,
            total,
            pages,
            has_next: request.page < pages,
            has_prev: request.page > 1,
        }
    }
}

/// A page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_info: PageInfo,
}

impl<T> Page<T> {
    /// Slice an already-sorted, already-filtered collection
    pub fn from_sorted(all: Vec<T>, request: &PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(request.offset())
            .take(request.limit as usize)
            .collect();
        Self {
            items,
            page_info: PageInfo::new(request, total),
        }
    }
}
