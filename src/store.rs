//! SQLite persistence for repositories, audits, issues and audit logs
//!
//! Log lines live in their own append-only table keyed by audit, so appending
//! never rewrites earlier entries. Deleting an audit cascades to its issues
//! and logs.

use crate::models::{
    Audit, AuditStatus, Issue, IssueType, LogEntry, LogLevel, NewIssue, Repository, Severity,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    branch TEXT NOT NULL DEFAULT 'main',
    created_at TEXT NOT NULL,
    UNIQUE (url, branch)
);

CREATE TABLE IF NOT EXISTS audits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'pending',
    total_files INTEGER NOT NULL DEFAULT 0,
    processed_files INTEGER NOT NULL DEFAULT 0,
    issues_found INTEGER NOT NULL DEFAULT 0,
    fixes_applied INTEGER NOT NULL DEFAULT 0,
    pr_url TEXT,
    pr_number INTEGER,
    error_message TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_audits_status ON audits(status);

CREATE TABLE IF NOT EXISTS issues (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    audit_id INTEGER NOT NULL REFERENCES audits(id) ON DELETE CASCADE,
    file_path TEXT NOT NULL,
    line_number INTEGER,
    issue_type TEXT NOT NULL,
    severity TEXT NOT NULL,
    description TEXT NOT NULL,
    explanation TEXT NOT NULL DEFAULT '',
    original_code TEXT,
    fixed_code TEXT,
    is_fixed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_issues_audit ON issues(audit_id);

CREATE TABLE IF NOT EXISTS audit_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    audit_id INTEGER NOT NULL REFERENCES audits(id) ON DELETE CASCADE,
    timestamp TEXT NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_audit_logs_audit ON audit_logs(audit_id);
"#;

const AUDIT_COLUMNS: &str = "id, repository_id, status, total_files, processed_files, \
     issues_found, fixes_applied, pr_url, pr_number, error_message, created_at, started_at, \
     completed_at";

const ISSUE_COLUMNS: &str = "id, audit_id, file_path, line_number, issue_type, severity, \
     description, explanation, original_code, fixed_code, is_fixed, created_at";

/// Aggregate counters across all audits
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditStats {
    pub total_audits: u64,
    pub by_status: BTreeMap<String, u64>,
    pub total_issues: u64,
    pub total_fixes_applied: u64,
    pub pull_requests_opened: u64,
}

/// Shared handle to the audit database
#[derive(Clone)]
pub struct AuditStore {
    conn: Arc<Mutex<Connection>>,
}

impl AuditStore {
    /// Open or create the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create database dir: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open audit db: {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init(conn)
    }

    /// Private in-memory database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize audit schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("Audit DB lock poisoned")
    }

    // ------------------------------------------------------------------------
    // Repositories
    // ------------------------------------------------------------------------

    /// Look up a repository by URL and branch, creating it when missing
    pub fn get_or_create_repository(
        &self,
        owner: &str,
        name: &str,
        url: &str,
        branch: &str,
    ) -> Result<Repository> {
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO repositories (url, owner, name, branch, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![url, owner, name, branch, Utc::now().to_rfc3339()],
        )?;
        conn.query_row(
            "SELECT id, owner, name, url, branch FROM repositories WHERE url = ?1 AND branch = ?2",
            params![url, branch],
            repository_from_row,
        )
        .context("Failed to load repository")
    }

    pub fn get_repository(&self, id: i64) -> Result<Option<Repository>> {
        let repo = self
            .conn()
            .query_row(
                "SELECT id, owner, name, url, branch FROM repositories WHERE id = ?1",
                params![id],
                repository_from_row,
            )
            .optional()?;
        Ok(repo)
    }

    // ------------------------------------------------------------------------
    // Audits
    // ------------------------------------------------------------------------

    /// Create a new PENDING audit for a repository
    pub fn create_audit(&self, repository_id: i64) -> Result<Audit> {
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO audits (repository_id, status, created_at) VALUES (?1, ?2, ?3)",
                params![
                    repository_id,
                    AuditStatus::Pending.as_str(),
                    Utc::now().to_rfc3339()
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.get_audit(id)?
            .context("Audit disappeared right after insert")
    }

    pub fn get_audit(&self, id: i64) -> Result<Option<Audit>> {
        let sql = format!("SELECT {} FROM audits WHERE id = ?1", AUDIT_COLUMNS);
        let audit = self
            .conn()
            .query_row(&sql, params![id], audit_from_row)
            .optional()?;
        Ok(audit)
    }

    pub fn list_audits(&self, limit: usize) -> Result<Vec<Audit>> {
        let sql = format!(
            "SELECT {} FROM audits ORDER BY id DESC LIMIT ?1",
            AUDIT_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![limit as i64], audit_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Oldest audit still waiting in PENDING
    pub fn next_pending(&self) -> Result<Option<i64>> {
        let id = self
            .conn()
            .query_row(
                "SELECT id FROM audits WHERE status = ?1 ORDER BY id ASC LIMIT 1",
                params![AuditStatus::Pending.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    /// Persist status, counters, PR linkage, error and timestamps
    pub fn save_audit(&self, audit: &Audit) -> Result<()> {
        save_audit_with(&self.conn(), audit)
    }

    /// Persist an audit state change together with its log line, atomically
    pub fn record_transition(&self, audit: &Audit, level: LogLevel, message: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        save_audit_with(&tx, audit)?;
        insert_log_with(&tx, audit.id, level, message, Utc::now())?;
        tx.commit()?;
        Ok(())
    }

    /// Put an audit back in the queue. Counters, PR linkage, error and issues
    /// are cleared; the log trail is kept.
    ///
    /// Accepts in-flight states too, so an audit left mid-run by a killed
    /// worker can be recovered. Only one worker may use a database.
    pub fn requeue(&self, id: i64) -> Result<bool> {
        let Some(audit) = self.get_audit(id)? else {
            return Ok(false);
        };
        if audit.status == AuditStatus::Pending {
            anyhow::bail!("Audit {} is already pending", id);
        }
        let message = if audit.status.is_terminal() {
            "Audit re-queued".to_string()
        } else {
            format!("Audit re-queued from {} (interrupted run)", audit.status)
        };

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM issues WHERE audit_id = ?1", params![id])?;
        tx.execute(
            "UPDATE audits SET status = ?1, total_files = 0, processed_files = 0,
                issues_found = 0, fixes_applied = 0, pr_url = NULL, pr_number = NULL,
                error_message = NULL, started_at = NULL, completed_at = NULL
             WHERE id = ?2",
            params![AuditStatus::Pending.as_str(), id],
        )?;
        insert_log_with(&tx, id, LogLevel::Info, &message, Utc::now())?;
        tx.commit()?;
        Ok(true)
    }

    /// Delete an audit with its issues and logs
    pub fn delete_audit(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM audits WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    // ------------------------------------------------------------------------
    // Logs
    // ------------------------------------------------------------------------

    pub fn append_log(&self, audit_id: i64, level: LogLevel, message: &str) -> Result<LogEntry> {
        let timestamp = Utc::now();
        insert_log_with(&self.conn(), audit_id, level, message, timestamp)?;
        Ok(LogEntry {
            timestamp,
            level,
            message: message.to_string(),
        })
    }

    /// Log trail in append order
    pub fn logs(&self, audit_id: i64) -> Result<Vec<LogEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT timestamp, level, message FROM audit_logs WHERE audit_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![audit_id], |row| {
            Ok(LogEntry {
                timestamp: parse_time(&row.get::<_, String>(0)?),
                level: LogLevel::parse(&row.get::<_, String>(1)?),
                message: row.get(2)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ------------------------------------------------------------------------
    // Issues
    // ------------------------------------------------------------------------

    pub fn insert_issue(&self, audit_id: i64, issue: &NewIssue) -> Result<Issue> {
        let created_at = Utc::now();
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO issues (
                    audit_id, file_path, line_number, issue_type, severity, description,
                    explanation, original_code, fixed_code, is_fixed, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    audit_id,
                    issue.file_path,
                    issue.line_number,
                    issue.issue_type.as_str(),
                    issue.severity.as_str(),
                    issue.description,
                    issue.explanation,
                    issue.original_code,
                    issue.fixed_code,
                    issue.is_fixed,
                    created_at.to_rfc3339(),
                ],
            )?;
            conn.last_insert_rowid()
        };

        Ok(Issue {
            id,
            audit_id,
            file_path: issue.file_path.clone(),
            line_number: issue.line_number,
            issue_type: issue.issue_type,
            severity: issue.severity,
            description: issue.description.clone(),
            explanation: issue.explanation.clone(),
            original_code: issue.original_code.clone(),
            fixed_code: issue.fixed_code.clone(),
            is_fixed: issue.is_fixed,
            created_at,
        })
    }

    pub fn issues(&self, audit_id: i64) -> Result<Vec<Issue>> {
        let sql = format!(
            "SELECT {} FROM issues WHERE audit_id = ?1 ORDER BY id ASC",
            ISSUE_COLUMNS
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![audit_id], issue_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_issue_fixed(&self, issue_id: i64, is_fixed: bool) -> Result<()> {
        self.conn().execute(
            "UPDATE issues SET is_fixed = ?1 WHERE id = ?2",
            params![is_fixed, issue_id],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Statistics
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> Result<AuditStats> {
        let conn = self.conn();
        let mut stats = AuditStats::default();

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM audits GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            stats.total_audits += count as u64;
            stats.by_status.insert(status, count as u64);
        }

        let (issues, fixes, prs): (i64, i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(issues_found), 0), COALESCE(SUM(fixes_applied), 0),
                    COUNT(pr_url)
             FROM audits",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        stats.total_issues = issues as u64;
        stats.total_fixes_applied = fixes as u64;
        stats.pull_requests_opened = prs as u64;

        Ok(stats)
    }
}

fn save_audit_with(conn: &Connection, audit: &Audit) -> Result<()> {
    let updated = conn.execute(
        "UPDATE audits SET status = ?1, total_files = ?2, processed_files = ?3,
            issues_found = ?4, fixes_applied = ?5, pr_url = ?6, pr_number = ?7,
            error_message = ?8, started_at = ?9, completed_at = ?10
         WHERE id = ?11",
        params![
            audit.status.as_str(),
            audit.total_files,
            audit.processed_files,
            audit.issues_found,
            audit.fixes_applied,
            audit.pr_url,
            audit.pr_number.map(|n| n as i64),
            audit.error_message,
            audit.started_at.map(|t| t.to_rfc3339()),
            audit.completed_at.map(|t| t.to_rfc3339()),
            audit.id,
        ],
    )?;
    if updated == 0 {
        anyhow::bail!("Audit {} no longer exists", audit.id);
    }
    Ok(())
}

fn insert_log_with(
    conn: &Connection,
    audit_id: i64,
    level: LogLevel,
    message: &str,
    timestamp: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO audit_logs (audit_id, timestamp, level, message) VALUES (?1, ?2, ?3, ?4)",
        params![audit_id, timestamp.to_rfc3339(), level.as_str(), message],
    )?;
    Ok(())
}

fn parse_time(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_optional_time(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn repository_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        url: row.get(3)?,
        branch: row.get(4)?,
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<Audit> {
    Ok(Audit {
        id: row.get(0)?,
        repository_id: row.get(1)?,
        status: AuditStatus::parse(&row.get::<_, String>(2)?).unwrap_or(AuditStatus::Failed),
        total_files: row.get(3)?,
        processed_files: row.get(4)?,
        issues_found: row.get(5)?,
        fixes_applied: row.get(6)?,
        pr_url: row.get(7)?,
        pr_number: row.get::<_, Option<i64>>(8)?.map(|n| n as u64),
        error_message: row.get(9)?,
        created_at: parse_time(&row.get::<_, String>(10)?),
        started_at: parse_optional_time(row.get(11)?),
        completed_at: parse_optional_time(row.get(12)?),
    })
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        audit_id: row.get(1)?,
        file_path: row.get(2)?,
        line_number: row.get(3)?,
        issue_type: IssueType::parse_lenient(&row.get::<_, String>(4)?),
        severity: Severity::parse_lenient(&row.get::<_, String>(5)?),
        description: row.get(6)?,
        explanation: row.get(7)?,
        original_code: row.get(8)?,
        fixed_code: row.get(9)?,
        is_fixed: row.get(10)?,
        created_at: parse_time(&row.get::<_, String>(11)?),
    })
}
