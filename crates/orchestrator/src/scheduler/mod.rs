//! Cron-driven workflow scheduling
//!
//! ```text
//! schedules_dir/*.yaml ──load──▶ Scheduler registry ──arm──▶ trigger task
//!                                                              │ tick
//!                                                              ▼
//!                                                   RunnerHandle::request_start
//! ```
//!
//! Definitions are declarative: [`Scheduler::reload_schedules`] rebuilds the
//! registry from disk, and CRUD operations write back to the same files.

mod cron;
mod definition;
mod error;
mod service;
mod trigger;

pub use cron::{parse_timezone, CronError, CronSchedule};
pub use definition::{ScheduleConfig, ScheduleFile, ScheduleRetry, TriggerConfig, WorkflowRef};
pub use error::SchedulerError;
pub use service::{
    LoadReport, ScheduleStats, ScheduledWorkflow, Scheduler, SchedulerConfig, SkippedDefinition,
};
