//! Workflow definitions

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::RunnerError;
use super::host::WorkflowExecutable;

/// A registered, versioned unit of work
///
/// Immutable once registered with the runner.
#[derive(Clone)]
pub struct WorkflowDefinition {
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    /// Start on runner initialization (once, or every `properties.interval` ms)
    pub auto_start: bool,
    pub properties: serde_json::Map<String, Value>,
    executable: Option<Arc<dyn WorkflowExecutable>>,
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("identity", &self.identity())
            .field("category", &self.category)
            .field("auto_start", &self.auto_start)
            .field("has_executable", &self.executable.is_some())
            .finish()
    }
}

impl WorkflowDefinition {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
            category: None,
            description: None,
            author: None,
            tags: Vec::new(),
            auto_start: false,
            properties: serde_json::Map::new(),
            executable: None,
        }
    }

    pub fn with_executable(mut self, executable: Arc<dyn WorkflowExecutable>) -> Self {
        self.executable = Some(executable);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// `namespace.Name`
    pub fn workflow_id(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// `namespace.Name@version`
    pub fn identity(&self) -> String {
        format!("{}.{}@{}", self.namespace, self.name, self.version)
    }

    pub fn executable(&self) -> Option<&Arc<dyn WorkflowExecutable>> {
        self.executable.as_ref()
    }

    /// Recurrence for auto-started definitions
    pub fn auto_start_interval(&self) -> Option<Duration> {
        self.properties
            .get("interval")
            .and_then(Value::as_u64)
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Integer major version used by the host and history
    pub fn major_version(&self) -> Result<u32, RunnerError> {
        parse_major_version(&self.version)
    }

    /// Check required fields
    pub fn validate(&self) -> Result<(), RunnerError> {
        let invalid = |reason: &str| RunnerError::InvalidDefinition {
            identity: self.identity(),
            reason: reason.to_string(),
        };
        let is_ident = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        };

        if !is_ident(&self.namespace) {
            return Err(invalid("namespace must be a non-empty identifier"));
        }
        if !is_ident(&self.name) {
            return Err(invalid("name must be a non-empty identifier"));
        }
        if self.version.trim().is_empty() {
            return Err(invalid("version is required"));
        }
        self.major_version()?;
        if self.executable.is_none() {
            return Err(invalid("executable is required"));
        }
        if self
            .properties
            .get("interval")
            .is_some_and(|v| v.as_u64().is_none())
        {
            return Err(invalid("properties.interval must be milliseconds"));
        }
        Ok(())
    }

    pub fn info(&self) -> WorkflowInfo {
        WorkflowInfo {
            identity: self.identity(),
            workflow_id: self.workflow_id(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            version: self.version.clone(),
            category: self.category.clone(),
            description: self.description.clone(),
            author: self.author.clone(),
            tags: self.tags.clone(),
            auto_start: self.auto_start,
            properties: self.properties.clone(),
        }
    }
}

/// Serializable view of a definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub identity: String,
    pub workflow_id: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
    pub category: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub auto_start: bool,
    pub properties: serde_json::Map<String, Value>,
}

/// Major component of a version string: `"1.0.0"` and `"v1.2"` are 1
pub fn parse_major_version(version: &str) -> Result<u32, RunnerError> {
    let trimmed = version.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    trimmed
        .split('.')
        .next()
        .and_then(|major| major.parse::<u32>().ok())
        .ok_or_else(|| RunnerError::InvalidVersion(version.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::executable_fn;

    fn body() -> Arc<dyn WorkflowExecutable> {
        executable_fn(|input| async move { Ok(input) })
    }

    #[test]
    fn test_parse_major_version() {
        assert_eq!(parse_major_version("1.0.0").unwrap(), 1);
        assert_eq!(parse_major_version("2").unwrap(), 2);
        assert_eq!(parse_major_version("v3.1").unwrap(), 3);
        assert_eq!(parse_major_version(" 10.4.2 ").unwrap(), 10);
        assert!(parse_major_version("").is_err());
        assert!(parse_major_version("one").is_err());
        assert!(parse_major_version("-1.0").is_err());
    }

    #[test]
    fn test_identity() {
        let def = WorkflowDefinition::new("core", "CleanCache", "1.0.0");
        assert_eq!(def.workflow_id(), "core.CleanCache");
        assert_eq!(def.identity(), "core.CleanCache@1.0.0");
    }

    #[test]
    fn test_validate() {
        let ok = WorkflowDefinition::new("core", "CleanCache", "1.0.0").with_executable(body());
        assert!(ok.validate().is_ok());

        let missing_body = WorkflowDefinition::new("core", "CleanCache", "1.0.0");
        assert!(matches!(
            missing_body.validate(),
            Err(RunnerError::InvalidDefinition { .. })
        ));

        let bad_namespace = WorkflowDefinition::new("", "CleanCache", "1.0.0").with_executable(body());
        assert!(bad_namespace.validate().is_err());

        let dotted_name = WorkflowDefinition::new("core", "Clean.Cache", "1.0.0").with_executable(body());
        assert!(dotted_name.validate().is_err());

        let bad_version = WorkflowDefinition::new("core", "CleanCache", "latest").with_executable(body());
        assert!(matches!(bad_version.validate(), Err(RunnerError::InvalidVersion(_))));

        let bad_interval = WorkflowDefinition::new("core", "CleanCache", "1")
            .with_executable(body())
            .with_property("interval", serde_json::json!("soon"));
        assert!(bad_interval.validate().is_err());
    }

    #[test]
    fn test_auto_start_interval() {
        let def = WorkflowDefinition::new("core", "Tick", "1")
            .with_auto_start(true)
            .with_property("interval", serde_json::json!(250));
        assert_eq!(def.auto_start_interval(), Some(Duration::from_millis(250)));
        assert_eq!(
            WorkflowDefinition::new("core", "Tick", "1").auto_start_interval(),
            None
        );
    }
}
