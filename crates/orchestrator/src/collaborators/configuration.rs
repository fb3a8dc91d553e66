//! Per-workflow configuration

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::CollaboratorError;

fn default_true() -> bool {
    true
}

/// Settings for one workflow version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfiguration {
    pub workflow_id: String,
    pub version: String,

    /// Disabled workflows are reported INACTIVE and refuse to start
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub settings: serde_json::Value,

    /// Object schema checked against start input
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

impl WorkflowConfiguration {
    pub fn new(workflow_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            version: version.into(),
            enabled: true,
            settings: serde_json::Value::Null,
            input_schema: None,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_settings(mut self, settings: serde_json::Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = Some(schema);
        self
    }
}

/// A problem found by [`ConfigurationManager::validate_all_configurations`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigurationIssue {
    pub workflow_id: String,
    pub version: String,
    pub message: String,
}

#[async_trait]
pub trait ConfigurationManager: Send + Sync + 'static {
    async fn initialize(&self) -> Result<(), CollaboratorError>;

    fn get_configuration(&self, workflow_id: &str, version: &str)
        -> Option<WorkflowConfiguration>;

    fn get_all_configurations(&self) -> Vec<WorkflowConfiguration>;

    fn validate_all_configurations(&self) -> Vec<ConfigurationIssue>;

    /// Re-read the backing source; returns the number of configurations
    async fn reload(&self) -> Result<usize, CollaboratorError>;

    /// Snapshot of every configuration as JSON
    fn export(&self) -> serde_json::Value;

    async fn shutdown(&self) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Deserialize)]
struct ConfigurationFile {
    #[serde(default)]
    configurations: Vec<WorkflowConfiguration>,
}

/// Configurations held in memory, optionally loaded from a YAML file
#[derive(Debug, Default)]
pub struct InMemoryConfigurationManager {
    source: Option<PathBuf>,
    configs: RwLock<BTreeMap<(String, String), WorkflowConfiguration>>,
}

impl InMemoryConfigurationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from (and hot-reload) a file with a `configurations:` list
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    pub fn set_configuration(&self, config: WorkflowConfiguration) {
        self.configs
            .write()
            .insert((config.workflow_id.clone(), config.version.clone()), config);
    }

    pub fn remove_configuration(&self, workflow_id: &str, version: &str) -> bool {
        self.configs
            .write()
            .remove(&(workflow_id.to_string(), version.to_string()))
            .is_some()
    }

    fn read_source(&self) -> Result<Option<Vec<WorkflowConfiguration>>, CollaboratorError> {
        let Some(path) = &self.source else {
            return Ok(None);
        };
        if !path.exists() {
            warn!(path = %path.display(), "configuration file missing, keeping current set");
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|source| CollaboratorError::Io {
            path: path.clone(),
            source,
        })?;
        let file: ConfigurationFile =
            serde_yaml::from_str(&content).map_err(|e| CollaboratorError::Parse {
                path: path.clone(),
                reason: e.to_string(),
            })?;
        Ok(Some(file.configurations))
    }
}

#[async_trait]
impl ConfigurationManager for InMemoryConfigurationManager {
    async fn initialize(&self) -> Result<(), CollaboratorError> {
        let count = self.reload().await?;
        info!(configurations = count, "configuration manager initialized");
        Ok(())
    }

    fn get_configuration(
        &self,
        workflow_id: &str,
        version: &str,
    ) -> Option<WorkflowConfiguration> {
        self.configs
            .read()
            .get(&(workflow_id.to_string(), version.to_string()))
            .cloned()
    }

    fn get_all_configurations(&self) -> Vec<WorkflowConfiguration> {
        self.configs.read().values().cloned().collect()
    }

    fn validate_all_configurations(&self) -> Vec<ConfigurationIssue> {
        let mut issues = Vec::new();
        for config in self.configs.read().values() {
            let mut issue = |message: &str| {
                issues.push(ConfigurationIssue {
                    workflow_id: config.workflow_id.clone(),
                    version: config.version.clone(),
                    message: message.to_string(),
                })
            };
            if config.workflow_id.trim().is_empty() {
                issue("workflow_id is empty");
            }
            if config.version.trim().is_empty() {
                issue("version is empty");
            }
            if !(config.settings.is_null() || config.settings.is_object()) {
                issue("settings must be an object");
            }
            if let Some(schema) = &config.input_schema {
                if !schema.is_object() {
                    issue("input_schema must be an object");
                } else if schema
                    .get("required")
                    .is_some_and(|r| !r.as_array().is_some_and(|a| a.iter().all(|v| v.is_string())))
                {
                    issue("input_schema.required must be a list of strings");
                }
            }
        }
        issues
    }

    async fn reload(&self) -> Result<usize, CollaboratorError> {
        if let Some(loaded) = self.read_source()? {
            let mut configs = self.configs.write();
            configs.clear();
            for config in loaded {
                configs.insert((config.workflow_id.clone(), config.version.clone()), config);
            }
        }
        Ok(self.configs.read().len())
    }

    fn export(&self) -> serde_json::Value {
        serde_json::json!({ "configurations": self.get_all_configurations() })
    }

    async fn shutdown(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
