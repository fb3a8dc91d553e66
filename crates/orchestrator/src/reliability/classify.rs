//! Error classification by message inspection

use serde::{Deserialize, Serialize};

/// Error taxonomy used for statistics and log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Validation,
    Permission,
    Resource,
    System,
    Unknown,
}

impl ErrorCategory {
    /// Severity derived from the category
    pub fn severity(self) -> ErrorSeverity {
        match self {
            Self::System => ErrorSeverity::Critical,
            Self::Resource | Self::Permission => ErrorSeverity::High,
            Self::Network | Self::Timeout => ErrorSeverity::Medium,
            Self::Validation => ErrorSeverity::Low,
            Self::Unknown => ErrorSeverity::Medium,
        }
    }

    /// Whether errors of this category are usually transient
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Network | Self::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Validation => "validation",
            Self::Permission => "permission",
            Self::Resource => "resource",
            Self::System => "system",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a categorized error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// Checked in order; the first category with a matching keyword wins.
const KEYWORDS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Timeout,
        &["timeout", "timed out", "deadline exceeded", "etimedout"],
    ),
    (
        ErrorCategory::Network,
        &[
            "network",
            "connection",
            "econnrefused",
            "econnreset",
            "enotfound",
            "socket",
            "dns",
            "unreachable",
        ],
    ),
    (
        ErrorCategory::Validation,
        &["validation", "invalid", "malformed", "required", "schema", "parse"],
    ),
    (
        ErrorCategory::Permission,
        &[
            "permission",
            "unauthorized",
            "forbidden",
            "access denied",
            "not allowed",
            "eacces",
        ],
    ),
    (
        ErrorCategory::Resource,
        &[
            "memory",
            "resource",
            "quota",
            "capacity",
            "disk",
            "too many",
            "exhausted",
            "enospc",
        ],
    ),
    (
        ErrorCategory::System,
        &["system", "internal", "panic", "fatal", "corrupt"],
    ),
];

/// Categorize an error by inspecting its message
pub fn classify_message(message: &str) -> ErrorCategory {
    let lower = message.to_lowercase();
    KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(category, _)| *category)
        .unwrap_or(ErrorCategory::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_keywords() {
        assert_eq!(classify_message("ECONNREFUSED 127.0.0.1:5432"), ErrorCategory::Network);
        assert_eq!(classify_message("operation timed out"), ErrorCategory::Timeout);
        assert_eq!(classify_message("Invalid input: name"), ErrorCategory::Validation);
        assert_eq!(classify_message("403 Forbidden"), ErrorCategory::Permission);
        assert_eq!(classify_message("out of memory"), ErrorCategory::Resource);
        assert_eq!(classify_message("internal invariant broken"), ErrorCategory::System);
        assert_eq!(classify_message("boom"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_timeout_wins_over_network() {
        assert_eq!(
            classify_message("connection timeout while reading"),
            ErrorCategory::Timeout
        );
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(ErrorCategory::System.severity(), ErrorSeverity::Critical);
        assert_eq!(ErrorCategory::Resource.severity(), ErrorSeverity::High);
        assert_eq!(ErrorCategory::Permission.severity(), ErrorSeverity::High);
        assert_eq!(ErrorCategory::Network.severity(), ErrorSeverity::Medium);
        assert_eq!(ErrorCategory::Timeout.severity(), ErrorSeverity::Medium);
        assert_eq!(ErrorCategory::Validation.severity(), ErrorSeverity::Low);
        assert_eq!(ErrorCategory::Unknown.severity(), ErrorSeverity::Medium);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Critical > ErrorSeverity::High);
        assert!(ErrorSeverity::High > ErrorSeverity::Medium);
        assert!(ErrorSeverity::Medium > ErrorSeverity::Low);
    }
}
