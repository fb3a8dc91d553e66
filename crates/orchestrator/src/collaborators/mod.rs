//! Seams to the configuration and security layers
//!
//! The runner reads per-workflow settings through [`ConfigurationManager`]
//! and authorizes user-initiated starts through [`SecurityManager`]. The
//! in-memory implementations here are complete enough to run the
//! orchestrator standalone.

mod configuration;
mod security;

use std::path::PathBuf;

pub use configuration::{
    ConfigurationIssue, ConfigurationManager, InMemoryConfigurationManager, WorkflowConfiguration,
};
pub use security::{
    AuditEvent, InMemorySecurityManager, SecurityConfig, SecurityManager, SecurityStats,
    UserContext, WorkflowAction,
};

#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },
}
