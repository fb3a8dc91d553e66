//! Declarative schedule definitions
//!
//! Schedules live as YAML files in the schedules directory. A file holds
//! either one schedule or a `schedules:` list:
//!
//! ```yaml
//! id: clean-cache-nightly
//! description: Purge stale cache entries
//! workflow:
//!   namespace: core
//!   name: CleanCache
//!   version: 1.0.0
//! trigger:
//!   cron: "0 3 * * *"
//!   timezone: "+01:00"
//! retry:
//!   attempts: 3
//!   delay: 5000
//! timeout: 60000
//! max_concurrent: 1
//! input:
//!   dry_run: false
//! ```

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::cron::CronSchedule;
use super::error::SchedulerError;
use crate::reliability::{RetryPolicy, TimeoutPolicy};

/// The workflow a schedule starts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowRef {
    pub namespace: String,
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
}

impl WorkflowRef {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    /// `namespace.Name`, the id instances are tracked under
    pub fn workflow_id(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    /// `namespace.Name@version`
    pub fn identity(&self) -> String {
        format!("{}.{}@{}", self.namespace, self.name, self.version)
    }
}

/// YAML writes `version: 1` as a number
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
        Raw::Float(f) => f.to_string(),
    })
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_true() -> bool {
    true
}

/// Cron trigger of a schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub cron: String,

    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Retry settings applied to each fired start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRetry {
    pub attempts: u32,

    #[serde(with = "crate::duration_millis")]
    pub delay: Duration,
}

impl Default for ScheduleRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_concurrent() -> u32 {
    1
}

/// One schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub workflow: WorkflowRef,

    pub trigger: TriggerConfig,

    /// No fires before this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_at: Option<DateTime<Utc>>,

    /// No fires after this instant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_at: Option<DateTime<Utc>>,

    /// Deactivate after this many fires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_executions: Option<u64>,

    #[serde(default)]
    pub retry: ScheduleRetry,

    /// Per-attempt timeout for the start call
    #[serde(default = "default_timeout", with = "crate::duration_millis")]
    pub timeout: Duration,

    /// Fires are skipped while this many started instances are unfinished
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default)]
    pub input: serde_json::Value,
}

impl ScheduleConfig {
    pub fn new(id: impl Into<String>, workflow: WorkflowRef, cron: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
            workflow,
            trigger: TriggerConfig {
                cron: cron.into(),
                timezone: default_timezone(),
                enabled: true,
            },
            start_at: None,
            end_at: None,
            max_executions: None,
            retry: ScheduleRetry::default(),
            timeout: default_timeout(),
            max_concurrent: default_max_concurrent(),
            created_by: None,
            input: serde_json::Value::Null,
        }
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.trigger.timezone = timezone.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.trigger.enabled = enabled;
        self
    }

    pub fn with_window(mut self, start_at: Option<DateTime<Utc>>, end_at: Option<DateTime<Utc>>) -> Self {
        self.start_at = start_at;
        self.end_at = end_at;
        self
    }

    pub fn with_max_executions(mut self, max: u64) -> Self {
        self.max_executions = Some(max);
        self
    }

    pub fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry = ScheduleRetry { attempts, delay };
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_input(mut self, input: serde_json::Value) -> Self {
        self.input = input;
        self
    }

    /// Check the definition and compile its trigger
    pub fn validate(&self) -> Result<CronSchedule, SchedulerError> {
        let invalid = |reason: &str| SchedulerError::Invalid {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id cannot be empty"));
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(invalid("id may only contain letters, digits, '-', '_' and '.'"));
        }
        if self.workflow.namespace.trim().is_empty()
            || self.workflow.name.trim().is_empty()
            || self.workflow.version.trim().is_empty()
        {
            return Err(invalid("workflow namespace, name and version are required"));
        }
        if self.max_concurrent == 0 {
            return Err(invalid("max_concurrent must be at least 1"));
        }
        if self.retry.attempts == 0 {
            return Err(invalid("retry.attempts must be at least 1"));
        }
        if let (Some(start), Some(end)) = (self.start_at, self.end_at) {
            if start >= end {
                return Err(invalid("start_at must be before end_at"));
            }
        }

        CronSchedule::parse_with_timezone(&self.trigger.cron, &self.trigger.timezone).map_err(
            |source| SchedulerError::Cron {
                id: self.id.clone(),
                source,
            },
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.retry.delay, self.retry.attempts.max(1))
    }

    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::fixed(self.timeout)
    }
}

/// Contents of one definition file
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ScheduleFile {
    Many { schedules: Vec<ScheduleConfig> },
    One(Box<ScheduleConfig>),
}

impl ScheduleFile {
    pub fn from_yaml(yaml: &str, path: &Path) -> Result<Self, SchedulerError> {
        serde_yaml::from_str(yaml).map_err(|e| SchedulerError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, SchedulerError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| SchedulerError::io(path, e))?;
        Self::from_yaml(&content, path)
    }

    pub fn into_schedules(self) -> Vec<ScheduleConfig> {
        match self {
            Self::Many { schedules } => schedules,
            Self::One(schedule) => vec![*schedule],
        }
    }

    /// Serialize a set of schedules the way they are read back
    pub fn to_yaml(schedules: &[ScheduleConfig]) -> Result<String, SchedulerError> {
        let file = match schedules {
            [single] => Self::One(Box::new(single.clone())),
            many => Self::Many {
                schedules: many.to_vec(),
            },
        };
        serde_yaml::to_string(&file).map_err(|e| SchedulerError::Invalid {
            id: schedules
                .first()
                .map(|s| s.id.clone())
                .unwrap_or_default(),
            reason: format!("cannot serialize: {e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SINGLE: &str = r#"
id: clean-cache-nightly
workflow:
  namespace: core
  name: CleanCache
  version: 1.0.0
trigger:
  cron: "0 3 * * *"
max_concurrent: 2
input:
  dry_run: true
"#;

    const LIST: &str = r#"
schedules:
  - id: a
    workflow: { namespace: core, name: A, version: 1 }
    trigger: { cron: "*/5 * * * *", timezone: "+02:00" }
  - id: b
    workflow: { namespace: core, name: B, version: "2.1.0" }
    trigger: { cron: "@daily", enabled: false }
    retry: { attempts: 5, delay: 250 }
    timeout: 1500
"#;

    fn path() -> PathBuf {
        PathBuf::from("test.yaml")
    }

    #[test]
    fn test_parse_single() {
        let schedules = ScheduleFile::from_yaml(SINGLE, &path())
            .unwrap()
            .into_schedules();
        assert_eq!(schedules.len(), 1);

        let schedule = &schedules[0];
        assert_eq!(schedule.workflow.identity(), "core.CleanCache@1.0.0");
        assert_eq!(schedule.workflow.workflow_id(), "core.CleanCache");
        assert_eq!(schedule.trigger.timezone, "UTC");
        assert!(schedule.trigger.enabled);
        assert_eq!(schedule.max_concurrent, 2);
        assert_eq!(schedule.retry, ScheduleRetry::default());
        assert_eq!(schedule.timeout, Duration::from_secs(300));
        assert_eq!(schedule.input["dry_run"], serde_json::json!(true));
        assert!(schedule.validate().is_ok());
    }

    #[test]
    fn test_parse_list_with_numeric_version() {
        let schedules = ScheduleFile::from_yaml(LIST, &path())
            .unwrap()
            .into_schedules();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].workflow.version, "1");
        assert_eq!(schedules[1].workflow.identity(), "core.B@2.1.0");
        assert!(!schedules[1].trigger.enabled);
        assert_eq!(schedules[1].retry.attempts, 5);
        assert_eq!(schedules[1].retry.delay, Duration::from_millis(250));
        assert_eq!(schedules[1].timeout, Duration::from_millis(1500));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = ScheduleFile::from_yaml("id: [unclosed", &path()).unwrap_err();
        assert!(matches!(err, SchedulerError::Parse { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_definitions() {
        let workflow = WorkflowRef::new("core", "A", "1.0.0");

        let bad_cron = ScheduleConfig::new("x", workflow.clone(), "61 * * * *");
        assert!(matches!(bad_cron.validate(), Err(SchedulerError::Cron { .. })));

        let bad_tz = ScheduleConfig::new("x", workflow.clone(), "* * * * *").with_timezone("Mars/Base");
        assert!(matches!(bad_tz.validate(), Err(SchedulerError::Cron { .. })));

        let bad_id = ScheduleConfig::new("has space", workflow.clone(), "* * * * *");
        assert!(matches!(bad_id.validate(), Err(SchedulerError::Invalid { .. })));

        let no_slots = ScheduleConfig::new("x", workflow.clone(), "* * * * *").with_max_concurrent(0);
        assert!(no_slots.validate().is_err());

        let now = Utc::now();
        let inverted = ScheduleConfig::new("x", workflow, "* * * * *")
            .with_window(Some(now), Some(now - chrono::Duration::hours(1)));
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_yaml_round_trip_preserves_config() {
        let original = ScheduleFile::from_yaml(LIST, &path())
            .unwrap()
            .into_schedules();
        let yaml = ScheduleFile::to_yaml(&original).unwrap();
        let reread = ScheduleFile::from_yaml(&yaml, &path())
            .unwrap()
            .into_schedules();
        assert_eq!(original, reread);
    }

    #[test]
    fn test_policies() {
        let schedule = ScheduleConfig::new("x", WorkflowRef::new("core", "A", "1"), "* * * * *")
            .with_retry(4, Duration::from_millis(100))
            .with_timeout(Duration::from_secs(2));
        assert_eq!(schedule.retry_policy().max_attempts, 4);
        assert_eq!(schedule.retry_policy().delay_for_attempt(3), Duration::from_millis(100));
        assert_eq!(schedule.timeout_policy().timeout_for_attempt(5), Duration::from_secs(2));
    }
}
