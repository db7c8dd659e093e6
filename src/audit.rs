//! Audit orchestration
//!
//! Drives one audit through clone, discovery, per-file analysis, fix
//! application and publishing. Every state change is persisted together with
//! its log line before the next step starts, so the stored trail always shows
//! how far an audit got. The cloned workspace is dropped (and deleted) on
//! every exit path.

use crate::config::Settings;
use crate::discover::{language_for, DiscoveredFile, FileDiscoverer};
use crate::fetch::RepositoryFetcher;
use crate::fix::FixApplier;
use crate::git_ops::Vcs;
use crate::github::PullRequestHost;
use crate::llm::{AnalysisError, CompletionService, IssueAnalyzer};
use crate::models::{Audit, AuditStatus, Issue, LogLevel, NewIssue, Repository};
use crate::publish::Publisher;
use crate::store::AuditStore;
use crate::util::redact_credentials;
use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;
use thiserror::Error;

/// A summary line is written after this many files
const PROGRESS_EVERY: usize = 5;

/// Why one file produced no analysis. Never fatal to the audit.
#[derive(Debug, Error)]
enum FileError {
    #[error("too large ({size} bytes, limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("unreadable: {0}")]
    Read(#[from] std::io::Error),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

/// Mirror an audit log line to tracing at the matching level
fn mirror(audit_id: i64, level: LogLevel, message: &str) {
    match level {
        LogLevel::Info | LogLevel::Success => tracing::info!(audit_id, "{}", message),
        LogLevel::Warning => tracing::warn!(audit_id, "{}", message),
        LogLevel::Error => tracing::error!(audit_id, "{}", message),
    }
}

/// The collaborators one audit run needs
pub struct AuditPipeline<'a> {
    store: &'a AuditStore,
    settings: &'a Settings,
    vcs: &'a dyn Vcs,
    ai: &'a dyn CompletionService,
    host: &'a dyn PullRequestHost,
}

impl<'a> AuditPipeline<'a> {
    pub fn new(
        store: &'a AuditStore,
        settings: &'a Settings,
        vcs: &'a dyn Vcs,
        ai: &'a dyn CompletionService,
        host: &'a dyn PullRequestHost,
    ) -> Self {
        Self {
            store,
            settings,
            vcs,
            ai,
            host,
        }
    }

    /// Append a log line and mirror it to tracing
    fn log(&self, audit_id: i64, level: LogLevel, message: &str) -> Result<()> {
        self.store.append_log(audit_id, level, message)?;
        mirror(audit_id, level, message);
        Ok(())
    }

    /// Persist a state change with its log line. The in-memory audit only
    /// moves once the write succeeded.
    fn advance(
        &self,
        audit: &mut Audit,
        next: AuditStatus,
        level: LogLevel,
        message: &str,
    ) -> Result<()> {
        let mut updated = audit.clone();
        updated.status = audit.status.transition_to(next)?;
        if next.is_terminal() {
            updated.completed_at = Some(Utc::now());
        }
        self.store.record_transition(&updated, level, message)?;
        *audit = updated;
        mirror(audit.id, level, message);
        Ok(())
    }

    fn mark_failed(&self, audit: &mut Audit, error: &str) -> Result<()> {
        audit.error_message = Some(error.to_string());
        self.advance(
            audit,
            AuditStatus::Failed,
            LogLevel::Error,
            &format!("❌ Audit failed: {}", error),
        )
    }

    /// Fail an audit from outside the pipeline (time limits). No-op when the
    /// audit is already finished or gone.
    pub fn fail_audit(&self, audit_id: i64, error: &str) -> Result<()> {
        let Some(mut audit) = self.store.get_audit(audit_id)? else {
            return Ok(());
        };
        if audit.status.is_terminal() {
            return Ok(());
        }
        self.mark_failed(&mut audit, error)
    }

    /// Run one PENDING audit to a terminal state.
    ///
    /// Returns the final audit, or `None` when the id is unknown. Pipeline
    /// failures end in FAILED and still return `Ok`; only store failures and
    /// a non-PENDING starting state are errors.
    pub async fn process_repository_audit(&self, audit_id: i64) -> Result<Option<Audit>> {
        let Some(mut audit) = self.store.get_audit(audit_id)? else {
            tracing::error!("Audit {} not found", audit_id);
            return Ok(None);
        };
        if audit.status != AuditStatus::Pending {
            tracing::warn!(
                audit_id,
                status = %audit.status,
                "Refusing to run audit that is not pending"
            );
            anyhow::bail!(
                "Audit {} is {}; requeue it before running it again",
                audit_id,
                audit.status
            );
        }

        if let Err(e) = self.run(&mut audit).await {
            let error = redact_credentials(&format!("{:#}", e));
            self.mark_failed(&mut audit, &error)
                .with_context(|| format!("Failed to record failure of audit {}", audit_id))?;
        }

        Ok(Some(audit))
    }

    async fn run(&self, audit: &mut Audit) -> Result<()> {
        let repository = self
            .store
            .get_repository(audit.repository_id)?
            .with_context(|| format!("Repository {} not found", audit.repository_id))?;

        audit.started_at = Some(Utc::now());
        let message = format!("🚀 Starting audit for {}", repository.full_name());
        self.store.record_transition(audit, LogLevel::Info, &message)?;
        mirror(audit.id, LogLevel::Info, &message);

        // Step 1: clone
        self.advance(
            audit,
            AuditStatus::Cloning,
            LogLevel::Info,
            "📥 Step 1: Cloning repository...",
        )?;
        let fetched = RepositoryFetcher::new(self.vcs, &self.settings.clone_dir)
            .fetch(&repository.url, &repository.branch)
            .context("Failed to clone repository")?;
        if fetched.used_fallback {
            self.log(
                audit.id,
                LogLevel::Warning,
                &format!(
                    "Branch '{}' not found; using fallback branch '{}'",
                    repository.branch, fetched.branch
                ),
            )?;
        }
        self.log(audit.id, LogLevel::Success, "✅ Repository cloned successfully")?;
        let workspace = fetched.workspace;

        // Pull requests target the branch that was actually cloned
        let base = Repository {
            branch: fetched.branch,
            ..repository
        };

        // Step 2: analyze
        self.advance(
            audit,
            AuditStatus::Analyzing,
            LogLevel::Info,
            "🔍 Step 2: Discovering files to analyze...",
        )?;
        let files =
            FileDiscoverer::new(self.settings.max_files_per_repo).discover(workspace.path());
        audit.total_files = u32::try_from(files.len()).unwrap_or(u32::MAX);
        self.store.save_audit(audit)?;
        self.log(
            audit.id,
            LogLevel::Info,
            &format!("📁 Found {} files to analyze", files.len()),
        )?;

        let store = self.store;
        let audit_id = audit.id;
        let analyzer = IssueAnalyzer::new(self.ai, self.settings.retry.clone()).with_log_sink(
            move |level, message| {
                if let Err(e) = store.append_log(audit_id, level, message) {
                    tracing::warn!(audit_id, "Failed to append analyzer log: {}", e);
                }
            },
        );

        let mut issues: Vec<Issue> = Vec::new();
        for (idx, file) in files.iter().enumerate() {
            match self.analyze_file(&analyzer, file).await {
                Ok(found) => {
                    for new_issue in &found {
                        issues.push(self.store.insert_issue(audit.id, new_issue)?);
                    }
                }
                Err(FileError::TooLarge { size, limit }) => {
                    tracing::warn!(
                        "Skipping {}: too large ({} bytes, limit {})",
                        file.relative_path,
                        size,
                        limit
                    );
                }
                Err(e) => {
                    tracing::error!("Error analyzing {}: {}", file.relative_path, e);
                    self.log(
                        audit.id,
                        LogLevel::Warning,
                        &format!("⚠️  Skipped {}: {}", file.relative_path, e),
                    )?;
                }
            }

            let processed = idx + 1;
            audit.processed_files = u32::try_from(processed).unwrap_or(u32::MAX);
            audit.issues_found = u32::try_from(issues.len()).unwrap_or(u32::MAX);
            self.store.save_audit(audit)?;

            if processed % PROGRESS_EVERY == 0 || processed == files.len() {
                self.log(
                    audit.id,
                    LogLevel::Info,
                    &format!(
                        "⚙️  Processed {}/{} files ({} issues found)",
                        processed,
                        files.len(),
                        issues.len()
                    ),
                )?;
            }
        }

        // Step 3: fix
        if !issues.is_empty() {
            self.advance(
                audit,
                AuditStatus::Fixing,
                LogLevel::Info,
                &format!("🔧 Step 3: Applying fixes for {} issues...", issues.len()),
            )?;

            if self.settings.validate_fixes {
                self.validate_fixes(&analyzer, audit.id, &mut issues).await?;
            }

            let applied = FixApplier::new().apply(workspace.path(), &issues);
            audit.fixes_applied = applied;
            self.store.save_audit(audit)?;
            self.log(
                audit.id,
                LogLevel::Success,
                &format!("✅ Applied {} fixes", applied),
            )?;
        }

        // Step 4: publish
        if audit.fixes_applied > 0 {
            self.advance(
                audit,
                AuditStatus::CreatingPr,
                LogLevel::Info,
                "📤 Step 4: Creating Pull Request...",
            )?;

            let publisher = Publisher::new(self.vcs, self.host);
            match publisher.publish(workspace.path(), &base, audit, &issues).await {
                Some(pr) => {
                    audit.pr_url = Some(pr.url);
                    audit.pr_number = Some(pr.number);
                    self.store.save_audit(audit)?;
                    self.log(
                        audit.id,
                        LogLevel::Success,
                        &format!("🎉 Pull Request created: #{}", pr.number),
                    )?;
                }
                None => {
                    self.log(
                        audit.id,
                        LogLevel::Warning,
                        "Pull request could not be created; fixes were not published",
                    )?;
                }
            }
        }

        let summary = format!(
            "✨ Audit completed successfully! Found {} issues, applied {} fixes",
            audit.issues_found, audit.fixes_applied
        );
        self.advance(audit, AuditStatus::Completed, LogLevel::Success, &summary)?;
        tracing::info!("Audit completed successfully for {}", base.full_name());

        drop(workspace);
        Ok(())
    }

    async fn analyze_file(
        &self,
        analyzer: &IssueAnalyzer<'_>,
        file: &DiscoveredFile,
    ) -> Result<Vec<NewIssue>, FileError> {
        let size = std::fs::metadata(&file.path)?.len();
        if size > self.settings.max_file_size {
            return Err(FileError::TooLarge {
                size,
                limit: self.settings.max_file_size,
            });
        }

        let bytes = std::fs::read(&file.path)?;
        let content = String::from_utf8_lossy(&bytes);

        let mut found = analyzer
            .analyze_file(&file.relative_path, &content, file.language)
            .await?;

        if self.settings.scan_secrets {
            let secrets = analyzer.scan_secrets(&file.relative_path, &content).await;
            found.extend(
                secrets
                    .into_iter()
                    .map(|secret| secret.into_issue(&file.relative_path)),
            );
        }

        Ok(found)
    }

    /// Ask the service to confirm each fix; rejected fixes lose their flag
    async fn validate_fixes(
        &self,
        analyzer: &IssueAnalyzer<'_>,
        audit_id: i64,
        issues: &mut [Issue],
    ) -> Result<()> {
        for issue in issues.iter_mut().filter(|i| i.has_applicable_fix()) {
            let (Some(original), Some(fixed)) =
                (issue.original_code.as_deref(), issue.fixed_code.as_deref())
            else {
                continue;
            };
            let language = language_for(Path::new(&issue.file_path)).unwrap_or("text");
            if analyzer.validate_fix(original, fixed, language).await {
                continue;
            }

            issue.is_fixed = false;
            self.store.set_issue_fixed(issue.id, false)?;
            self.log(
                audit_id,
                LogLevel::Warning,
                &format!("Fix for {} rejected by validation", issue.file_path),
            )?;
        }
        Ok(())
    }
}
