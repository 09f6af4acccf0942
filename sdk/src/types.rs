//! Task result protocol
//!
//! Every executable operation in Luna returns a [`TaskResult`]. It is the only
//! shape the control loop, reflection, memory and presentation layers consume;
//! no component reaches into handler-specific output formats.
//!
//! Invariants enforced by construction (including deserialization):
//!
//! - a `failed` result is never `verified`
//! - an unverified `success` is demoted to `partial`
//! - `confidence` is clamped to `0.0..=1.0`

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message attached to a success that could not be independently verified
const UNVERIFIED_DEMOTION: &str =
    "Status demoted from success to partial: output was not independently verified.";

/// Outcome status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failed,
    Partial,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk tier of an action
///
/// Ordered from least to most risky so tiers can be compared directly.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Dangerous,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Dangerous => "dangerous",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time snapshot of the host system
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// Operating system family (linux, macos, windows)
    pub os: String,

    /// CPU architecture
    pub arch: String,

    /// Host name, when it could be determined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Number of logical CPUs
    pub cpu_count: usize,

    /// 1, 5 and 15 minute load averages (unix only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_average: Option<[f64; 3]>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_total_kb: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_available_kb: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,

    /// Unix timestamp (seconds) when the snapshot was taken
    pub captured_at: i64,
}

/// Canonical result of any executable operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TaskResultRecord")]
pub struct TaskResult {
    status: TaskStatus,
    content: String,
    error: String,
    execution_used: bool,
    confidence: f64,
    risk_level: RiskLevel,
    verified: bool,
    system_state: Option<SystemSnapshot>,
}

impl TaskResult {
    /// Success path
    ///
    /// `verified` must only be true when an independent post-condition check
    /// passed. An unverified success is demoted to `partial`.
    pub fn success(
        content: impl Into<String>,
        confidence: f64,
        verified: bool,
        system_state: Option<SystemSnapshot>,
    ) -> Self {
        Self::normalized(Self {
            status: TaskStatus::Success,
            content: content.into(),
            error: String::new(),
            execution_used: true,
            confidence,
            risk_level: RiskLevel::Low,
            verified,
            system_state,
        })
    }

    /// Failure path. A failure is never verified.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            content: String::new(),
            error: error.into(),
            execution_used: false,
            confidence: 0.0,
            risk_level: RiskLevel::Low,
            verified: false,
            system_state: None,
        }
    }

    /// Attach output content (e.g. stdout of a failed command)
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    /// Mark whether a real operation handler was reached
    pub fn with_execution_used(mut self, execution_used: bool) -> Self {
        self.execution_used = execution_used;
        self
    }

    pub fn with_system_state(mut self, system_state: Option<SystemSnapshot>) -> Self {
        self.system_state = system_state;
        self
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn execution_used(&self) -> bool {
        self.execution_used
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn verified(&self) -> bool {
        self.verified
    }

    pub fn system_state(&self) -> Option<&SystemSnapshot> {
        self.system_state.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    fn normalized(mut self) -> Self {
        self.confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };

        match self.status {
            TaskStatus::Failed => self.verified = false,
            TaskStatus::Success if !self.verified => {
                self.status = TaskStatus::Partial;
                if self.error.is_empty() {
                    self.error = UNVERIFIED_DEMOTION.to_string();
                }
            }
            _ => {}
        }

        self
    }
}

impl fmt::Display for TaskResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TaskResult(status={}, verified={}, confidence={:.2}, risk={})",
            self.status, self.verified, self.confidence, self.risk_level
        )
    }
}

/// Wire form of a task result; normalized on the way in
#[derive(Deserialize)]
struct TaskResultRecord {
    status: TaskStatus,
    #[serde(default)]
    content: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    execution_used: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    risk_level: RiskLevel,
    #[serde(default)]
    verified: bool,
    #[serde(default)]
    system_state: Option<SystemSnapshot>,
}

impl From<TaskResultRecord> for TaskResult {
    fn from(record: TaskResultRecord) -> Self {
        TaskResult::normalized(TaskResult {
            status: record.status,
            content: record.content,
            error: record.error,
            execution_used: record.execution_used,
            confidence: record.confidence,
            risk_level: record.risk_level,
            verified: record.verified,
            system_state: record.system_state,
        })
    }
}
