//! Health monitor.
//!
//! Verifies the connections the agent depends on:
//!
//! | check          | needs                                   | critical |
//! |----------------|-----------------------------------------|----------|
//! | environment    | MCP URL and token                       | yes      |
//! | mcp_connection | Home Assistant MCP endpoint             | yes      |
//! | rest_api       | Home Assistant REST API (`HA_URL`)      | yes      |
//! | livekit        | LiveKit room server                     | no       |
//! | voice_backend  | Google service account credentials      | no       |
//!
//! Unconfigured optional services report a warning, which never fails the
//! overall status.

mod checks;
mod monitor;

pub use checks::HealthChecker;
pub use monitor::HealthMonitor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Success,
    Warning,
    Error,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(default)]
    pub details: Map<String, Value>,
    /// An error here fails the overall report
    pub critical: bool,
}

impl CheckResult {
    fn new(name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            details: Map::new(),
            critical: true,
        }
    }

    pub fn success(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Success, message)
    }

    pub fn warning(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warning, message)
    }

    pub fn error(name: &str, message: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Error, message)
    }

    pub fn detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn non_critical(mut self) -> Self {
        self.critical = false;
        self
    }

    pub fn is_critical_error(&self) -> bool {
        self.critical && self.status == CheckStatus::Error
    }
}

/// Result of a full health run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    /// In the order they ran
    pub checks: Vec<CheckResult>,
    pub overall_status: CheckStatus,
    pub message: String,
}

impl HealthReport {
    pub fn from_checks(checks: Vec<CheckResult>) -> Self {
        let critical = checks.iter().filter(|c| c.is_critical_error()).count();
        let (overall_status, message) = if critical > 0 {
            (
                CheckStatus::Error,
                format!("Health check failed with {} critical errors", critical),
            )
        } else {
            (CheckStatus::Success, "All critical checks passed".to_string())
        };

        Self {
            timestamp: Utc::now(),
            checks,
            overall_status,
            message,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.overall_status != CheckStatus::Error
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}
