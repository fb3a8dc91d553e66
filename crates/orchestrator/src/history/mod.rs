//! Durable execution history
//!
//! The lifecycle layer reads this store through its history façade; the
//! execution host appends to it. Records are never rewritten by queries.

mod memory;
mod query;
mod record;
mod store;

pub use memory::InMemoryHistoryStore;
pub use query::{
    HistoryFilter, HistoryQuery, Page, PageInfo, PageRequest, SortField, SortOrder, MAX_PAGE_LIMIT,
};
pub use record::{ExecutionPointer, ExecutionRecord, ExecutionStatus, PointerStatus};
pub use store::{DefinitionStats, HistoryError, HistoryStore};
