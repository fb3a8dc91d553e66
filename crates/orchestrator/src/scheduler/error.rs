//! Scheduler errors

use std::path::PathBuf;

use super::cron::CronError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("schedule not found: {0}")]
    NotFound(String),

    #[error("schedule already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid schedule '{id}': {reason}")]
    Invalid { id: String, reason: String },

    #[error("invalid schedule '{id}': {source}")]
    Cron {
        id: String,
        #[source]
        source: CronError,
    },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SchedulerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
