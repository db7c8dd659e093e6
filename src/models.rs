//! Audit, repository and issue records
//!
//! The audit status is a closed enum with an explicit transition table, so the
//! pipeline can never move an audit backwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Audit status state machine
// ============================================================================

/// Lifecycle of one audit.
///
/// Forward order: Pending -> Cloning -> Analyzing -> Fixing -> CreatingPr -> Completed.
/// Fixing and CreatingPr may be skipped. Failed is reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Pending,
    Cloning,
    Analyzing,
    Fixing,
    CreatingPr,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal audit transition {from} -> {to}")]
pub struct TransitionError {
    pub from: AuditStatus,
    pub to: AuditStatus,
}

impl AuditStatus {
    pub const ALL: [AuditStatus; 7] = [
        AuditStatus::Pending,
        AuditStatus::Cloning,
        AuditStatus::Analyzing,
        AuditStatus::Fixing,
        AuditStatus::CreatingPr,
        AuditStatus::Completed,
        AuditStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Pending => "pending",
            AuditStatus::Cloning => "cloning",
            AuditStatus::Analyzing => "analyzing",
            AuditStatus::Fixing => "fixing",
            AuditStatus::CreatingPr => "creating_pr",
            AuditStatus::Completed => "completed",
            AuditStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AuditStatus::Completed | AuditStatus::Failed)
    }

    /// Whether the pipeline may move from `self` to `next`.
    pub fn can_transition_to(&self, next: AuditStatus) -> bool {
        use AuditStatus::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, Cloning) => true,
            (Cloning, Analyzing) => true,
            (Analyzing, Fixing | Completed) => true,
            (Fixing, CreatingPr | Completed) => true,
            (CreatingPr, Completed) => true,
            _ => false,
        }
    }

    pub fn transition_to(&self, next: AuditStatus) -> Result<AuditStatus, TransitionError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(TransitionError { from: *self, to: next })
        }
    }
}

impl std::fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Issue classification
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    SyntaxError,
    LogicError,
    SecurityVulnerability,
    CodeSmell,
    PerformanceIssue,
    SecretExposure,
}

impl IssueType {
    pub const ALL: [IssueType; 6] = [
        IssueType::SyntaxError,
        IssueType::LogicError,
        IssueType::SecurityVulnerability,
        IssueType::CodeSmell,
        IssueType::PerformanceIssue,
        IssueType::SecretExposure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::SyntaxError => "syntax_error",
            IssueType::LogicError => "logic_error",
            IssueType::SecurityVulnerability => "security_vulnerability",
            IssueType::CodeSmell => "code_smell",
            IssueType::PerformanceIssue => "performance_issue",
            IssueType::SecretExposure => "secret_exposure",
        }
    }

    /// Unknown or missing types are recorded as code smells.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "syntax_error" => IssueType::SyntaxError,
            "logic_error" => IssueType::LogicError,
            "security_vulnerability" => IssueType::SecurityVulnerability,
            "performance_issue" => IssueType::PerformanceIssue,
            "secret_exposure" => IssueType::SecretExposure,
            _ => IssueType::CodeSmell,
        }
    }

    /// "security_vulnerability" -> "Security Vulnerability"
    pub fn title(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// Unknown or missing severities are recorded as medium.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Severity::Low,
            "high" => Severity::High,
            "critical" => Severity::Critical,
            _ => Severity::Medium,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Records
// ============================================================================

/// The audited GitHub project. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub url: String,
    /// Branch to audit and to open pull requests against
    pub branch: String,
}

impl Repository {
    /// `owner/name`, the key the hosting API uses
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// One pipeline execution for one repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Audit {
    pub id: i64,
    pub repository_id: i64,
    pub status: AuditStatus,
    pub total_files: u32,
    pub processed_files: u32,
    pub issues_found: u32,
    pub fixes_applied: u32,
    pub pr_url: Option<String>,
    pub pr_number: Option<u64>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "SUCCESS",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "WARNING" => LogLevel::Warning,
            "ERROR" => LogLevel::Error,
            "SUCCESS" => LogLevel::Success,
            _ => LogLevel::Info,
        }
    }
}

/// One line of an audit's narrative trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// One AI-detected problem, before it is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIssue {
    /// Relative to the repository root
    pub file_path: String,
    pub line_number: Option<u32>,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub description: String,
    pub explanation: String,
    pub original_code: Option<String>,
    pub fixed_code: Option<String>,
    /// True only when a fixed-code snippet was supplied
    pub is_fixed: bool,
}

/// A stored issue, owned by one audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub audit_id: i64,
    pub file_path: String,
    pub line_number: Option<u32>,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub description: String,
    pub explanation: String,
    pub original_code: Option<String>,
    pub fixed_code: Option<String>,
    pub is_fixed: bool,
    pub created_at: DateTime<Utc>,
}

impl Issue {
    /// Has a non-empty replacement snippet and is flagged fixable
    pub fn has_applicable_fix(&self) -> bool {
        self.is_fixed && self.fixed_code.as_deref().is_some_and(|code| !code.is_empty())
    }
}
