//! Authorization, input validation, rate limiting and audit

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::CollaboratorError;

/// Operations a user may perform on a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowAction {
    Execute,
    Pause,
    Resume,
    Cancel,
    View,
    Manage,
}

impl WorkflowAction {
    pub const ALL: [WorkflowAction; 6] = [
        Self::Execute,
        Self::Pause,
        Self::Resume,
        Self::Cancel,
        Self::View,
        Self::Manage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::View => "view",
            Self::Manage => "manage",
        }
    }
}

impl std::fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The caller of a user-initiated operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub action: String,
    pub resource: String,
    pub success: bool,
    #[serde(default)]
    pub details: Value,
}

impl AuditEvent {
    pub fn new(
        user_id: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        success: bool,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            user_id: user_id.into(),
            action: action.into(),
            resource: resource.into(),
            success,
            details: Value::Null,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityStats {
    pub audit_events: u64,
    pub failed_events: u64,
    pub denied_requests: u64,
    pub rate_limited_requests: u64,
    pub tracked_rate_windows: usize,
}

#[async_trait]
pub trait SecurityManager: Send + Sync + 'static {
    async fn initialize(&self) -> Result<(), CollaboratorError>;

    fn check_workflow_permission(
        &self,
        user: &UserContext,
        workflow_id: &str,
        version: &str,
        action: WorkflowAction,
    ) -> bool;

    fn validate_input(&self, data: &Value, schema: Option<&Value>)
        -> Result<(), CollaboratorError>;

    /// Count one call and report whether it is within the limit
    fn check_rate_limit(&self, user_id: &str, operation: &str) -> bool;

    fn log_audit_event(&self, event: AuditEvent);

    /// Most recent events first
    fn audit_events(&self, user_id: Option<&str>, limit: usize) -> Vec<AuditEvent>;

    fn security_stats(&self) -> SecurityStats;

    async fn shutdown(&self) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Calls per user and operation per minute; 0 disables limiting
    pub rate_limit_per_minute: u32,
    pub audit_capacity: usize,
    pub role_grants: HashMap<String, Vec<WorkflowAction>>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        let role_grants = HashMap::from([
            ("admin".to_string(), WorkflowAction::ALL.to_vec()),
            (
                "operator".to_string(),
                vec![
                    WorkflowAction::Execute,
                    WorkflowAction::Pause,
                    WorkflowAction::Resume,
                    WorkflowAction::Cancel,
                    WorkflowAction::View,
                ],
            ),
            ("viewer".to_string(), vec![WorkflowAction::View]),
        ]);
        Self {
            rate_limit_per_minute: 60,
            audit_capacity: 10_000,
            role_grants,
        }
    }
}

impl SecurityConfig {
    pub fn with_rate_limit_per_minute(mut self, limit: u32) -> Self {
        self.rate_limit_per_minute = limit;
        self
    }

    pub fn with_audit_capacity(mut self, capacity: usize) -> Self {
        self.audit_capacity = capacity.max(1);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>, actions: Vec<WorkflowAction>) -> Self {
        self.role_grants.insert(role.into(), actions);
        self
    }
}

#[derive(Debug, Default)]
struct RateWindow {
    minute: i64,
    count: u32,
}

/// Role-based permissions, per-minute windows and a bounded audit log
#[derive(Debug, Default)]
pub struct InMemorySecurityManager {
    config: SecurityConfig,
    windows: DashMap<String, RateWindow>,
    audit: RwLock<VecDeque<AuditEvent>>,
    audit_total: AtomicU64,
    failed_total: AtomicU64,
    denied: AtomicU64,
    rate_limited: AtomicU64,
}

impl InMemorySecurityManager {
    pub fn new(config: SecurityConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    fn current_minute() -> i64 {
        Utc::now().timestamp() / 60
    }
}

#[async_trait]
impl SecurityManager for InMemorySecurityManager {
    async fn initialize(&self) -> Result<(), CollaboratorError> {
        info!(
            roles = self.config.role_grants.len(),
            rate_limit_per_minute = self.config.rate_limit_per_minute,
            "security manager initialized"
        );
        Ok(())
    }

    fn check_workflow_permission(
        &self,
        user: &UserContext,
        workflow_id: &str,
        version: &str,
        action: WorkflowAction,
    ) -> bool {
        let allowed = user.roles.iter().any(|role| {
            self.config
                .role_grants
                .get(role)
                .is_some_and(|actions| actions.contains(&action))
        });
        if !allowed {
            self.denied.fetch_add(1, Ordering::Relaxed);
            warn!(user_id = %user.user_id, workflow_id, version, %action, "permission denied");
        }
        allowed
    }

    fn validate_input(
        &self,
        data: &Value,
        schema: Option<&Value>,
    ) -> Result<(), CollaboratorError> {
        let Some(schema) = schema else {
            return Ok(());
        };

        let invalid = |msg: String| Err(CollaboratorError::InvalidInput(msg));
        let object = match data {
            Value::Object(map) => map,
            Value::Null => return invalid("input is required".to_string()),
            other => return invalid(format!("input must be an object, got {}", type_name(other))),
        };

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !object.contains_key(key) {
                    return invalid(format!("missing required field '{key}'"));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, property) in properties {
                let (Some(value), Some(expected)) =
                    (object.get(key), property.get("type").and_then(Value::as_str))
                else {
                    continue;
                };
                let matches = match expected {
                    "integer" => value.is_i64() || value.is_u64(),
                    other => type_name(value) == other,
                };
                if !matches {
                    return invalid(format!(
                        "field '{key}' must be {expected}, got {}",
                        type_name(value)
                    ));
                }
            }
        }

        Ok(())
    }

    fn check_rate_limit(&self, user_id: &str, operation: &str) -> bool {
        let limit = self.config.rate_limit_per_minute;
        if limit == 0 {
            return true;
        }

        let minute = Self::current_minute();
        let mut window = self
            .windows
            .entry(format!("{user_id}:{operation}"))
            .or_default();
        if window.minute != minute {
            window.minute = minute;
            window.count = 0;
        }
        if window.count >= limit {
            drop(window);
            self.rate_limited.fetch_add(1, Ordering::Relaxed);
            warn!(user_id, operation, limit, "rate limit exceeded");
            return false;
        }
        window.count += 1;
        drop(window);

        // Stale windows from earlier minutes are dropped lazily
        self.windows.retain(|_, w| w.minute >= minute - 1);
        true
    }

    fn log_audit_event(&self, event: AuditEvent) {
        if event.success {
            info!(user_id = %event.user_id, action = %event.action, resource = %event.resource, "AUDIT");
        } else {
            self.failed_total.fetch_add(1, Ordering::Relaxed);
            warn!(user_id = %event.user_id, action = %event.action, resource = %event.resource, details = %event.details, "AUDIT: failed");
        }
        self.audit_total.fetch_add(1, Ordering::Relaxed);

        let mut audit = self.audit.write();
        audit.push_back(event);
        while audit.len() > self.config.audit_capacity.max(1) {
            audit.pop_front();
        }
    }

    fn audit_events(&self, user_id: Option<&str>, limit: usize) -> Vec<AuditEvent> {
        self.audit
            .read()
            .iter()
            .rev()
            .filter(|e| user_id.map_or(true, |id| e.user_id == id))
            .take(limit)
            .cloned()
            .collect()
    }

    fn security_stats(&self) -> SecurityStats {
        SecurityStats {
            audit_events: self.audit_total.load(Ordering::Relaxed),
            failed_events: self.failed_total.load(Ordering::Relaxed),
            denied_requests: self.denied.load(Ordering::Relaxed),
            rate_limited_requests: self.rate_limited.load(Ordering::Relaxed),
            tracked_rate_windows: self.windows.len(),
        }
    }

    async fn shutdown(&self) -> Result<(), CollaboratorError> {
        self.windows.clear();
        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
