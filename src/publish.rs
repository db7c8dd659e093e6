//! Commit, push and open a pull request for applied fixes
//!
//! Fixes always land on a fresh `fix/ai-auto-patch-<audit id>` branch, never
//! on the repository's base branch. Any failure along the way is reported as
//! "no pull request" and does not fail the audit.

use crate::git_ops::Vcs;
use crate::github::{HostError, PullRequest, PullRequestHost};
use crate::models::{Audit, Issue, Repository};
use std::fmt::Write as _;
use std::path::Path;
use thiserror::Error;

/// Issues listed individually in the commit message
const COMMIT_ISSUE_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("refusing to publish onto base branch '{0}'")]
    BaseBranch(String),

    #[error("git {step} failed: {message}")]
    Git { step: &'static str, message: String },

    #[error(transparent)]
    Host(#[from] HostError),
}

pub fn branch_name(audit_id: i64) -> String {
    format!("fix/ai-auto-patch-{}", audit_id)
}

pub fn pr_title(issue_count: usize) -> String {
    format!("🤖 patchpilot: Fix {} issues", issue_count)
}

pub fn commit_message(issues: &[Issue]) -> String {
    let mut message = format!(
        "{}\n\nThis change was generated automatically by patchpilot.\n\nIssues fixed:\n",
        pr_title(issues.len())
    );
    for issue in issues.iter().take(COMMIT_ISSUE_LIMIT) {
        let _ = writeln!(message, "- {}: {}", issue.issue_type, issue.description);
    }
    if issues.len() > COMMIT_ISSUE_LIMIT {
        let _ = writeln!(message, "- ... and {} more", issues.len() - COMMIT_ISSUE_LIMIT);
    }
    message
}

pub fn pr_body(audit: &Audit, issues: &[Issue]) -> String {
    let mut body = String::from("## patchpilot - Automated Code Fixes\n\n");
    body.push_str("This pull request was generated automatically.\n\n");
    body.push_str("### Summary\n");
    let _ = writeln!(body, "- **Total Issues Found**: {}", audit.issues_found);
    let _ = writeln!(body, "- **Fixes Applied**: {}", audit.fixes_applied);
    body.push_str("\n### Issues\n");

    for issue in issues {
        let _ = writeln!(
            body,
            "\n#### {} - {}",
            issue.issue_type.title(),
            issue.severity.as_str().to_uppercase()
        );
        let _ = writeln!(body, "**File**: `{}`", issue.file_path);
        let _ = writeln!(body, "**Description**: {}", issue.description);
        if let Some(line) = issue.line_number {
            let _ = writeln!(body, "**Line**: {}", line);
        }
        body.push_str("\n---\n");
    }

    body.push_str(
        "\n### Important\n\
         Review these changes carefully before merging. \
         The fixes were produced by a language model and need human review.\n\n\
         ### How to Test\n\
         1. Check out this branch\n\
         2. Run your test suite\n\
         3. Verify the changes manually\n",
    );
    body
}

pub struct Publisher<'a> {
    vcs: &'a dyn Vcs,
    host: &'a dyn PullRequestHost,
}

impl<'a> Publisher<'a> {
    pub fn new(vcs: &'a dyn Vcs, host: &'a dyn PullRequestHost) -> Self {
        Self { vcs, host }
    }

    /// Publish the working-tree changes. `None` on any failure.
    pub async fn publish(
        &self,
        workspace: &Path,
        repository: &Repository,
        audit: &Audit,
        issues: &[Issue],
    ) -> Option<PullRequest> {
        match self.try_publish(workspace, repository, audit, issues).await {
            Ok(pr) => Some(pr),
            Err(e) => {
                tracing::error!(audit_id = audit.id, "Failed to create PR: {}", e);
                None
            }
        }
    }

    pub async fn try_publish(
        &self,
        workspace: &Path,
        repository: &Repository,
        audit: &Audit,
        issues: &[Issue],
    ) -> Result<PullRequest, PublishError> {
        let branch = branch_name(audit.id);
        if branch == repository.branch {
            return Err(PublishError::BaseBranch(branch));
        }

        let git = |step: &'static str| move |e: anyhow::Error| PublishError::Git {
            step,
            message: format!("{:#}", e),
        };

        self.vcs.create_branch(workspace, &branch).map_err(git("branch"))?;
        self.vcs.stage_all(workspace).map_err(git("stage"))?;
        self.vcs
            .commit(workspace, &commit_message(issues))
            .map_err(git("commit"))?;
        self.vcs.push(workspace, &branch).map_err(git("push"))?;

        let pr = self
            .host
            .create_pull_request(
                &repository.full_name(),
                &branch,
                &repository.branch,
                &pr_title(issues.len()),
                &pr_body(audit, issues),
            )
            .await?;
        Ok(pr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git_ops::CloneAttemptError;
    use crate::models::{AuditStatus, IssueType, Severity};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    fn issue(n: usize) -> Issue {
        Issue {
            id: n as i64,
            audit_id: 7,
            file_path: format!("src/file{}.py", n),
            line_number: if n % 2 == 0 { Some(n as u32 + 1) } else { None },
            issue_type: IssueType::SecurityVulnerability,
            severity: Severity::High,
            description: format!("problem {}", n),
            explanation: String::new(),
            original_code: Some("a".into()),
            fixed_code: Some("b".into()),
            is_fixed: true,
            created_at: Utc::now(),
        }
    }

    fn audit() -> Audit {
        Audit {
            id: 7,
            repository_id: 1,
            status: AuditStatus::CreatingPr,
            total_files: 3,
            processed_files: 3,
            issues_found: 2,
            fixes_applied: 1,
            pr_url: None,
            pr_number: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    fn repository() -> Repository {
        Repository {
            id: 1,
            owner: "octo".into(),
            name: "demo".into(),
            url: "https://github.com/octo/demo".into(),
            branch: "main".into(),
        }
    }

    #[derive(Default)]
    struct RecordingVcs {
        calls: Mutex<Vec<String>>,
        fail_push: bool,
    }

    impl Vcs for RecordingVcs {
        fn clone_branch(&self, _: &str, _: &str, _: &Path) -> Result<(), CloneAttemptError> {
            unimplemented!()
        }
        fn create_branch(&self, _: &Path, name: &str) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push(format!("branch {}", name));
            Ok(())
        }
        fn stage_all(&self, _: &Path) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("stage".into());
            Ok(())
        }
        fn commit(&self, _: &Path, message: &str) -> anyhow::Result<String> {
            let first = message.lines().next().unwrap_or_default().to_string();
            self.calls.lock().unwrap().push(format!("commit {}", first));
            Ok("abc123".into())
        }
        fn push(&self, _: &Path, branch: &str) -> anyhow::Result<()> {
            if self.fail_push {
                anyhow::bail!("remote rejected");
            }
            self.calls.lock().unwrap().push(format!("push {}", branch));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingHost {
        requests: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl PullRequestHost for RecordingHost {
        async fn create_pull_request(
            &self,
            full_name: &str,
            head: &str,
            base: &str,
            _title: &str,
            _body: &str,
        ) -> Result<PullRequest, HostError> {
            self.requests
                .lock()
                .unwrap()
                .push((full_name.into(), head.into(), base.into()));
            Ok(PullRequest {
                url: format!("https://github.com/{}/pull/12", full_name),
                number: 12,
            })
        }

        async fn fork_repository(&self, _: &str) -> Result<String, HostError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_publish_runs_git_steps_then_opens_pr() {
        let vcs = RecordingVcs::default();
        let host = RecordingHost::default();
        let publisher = Publisher::new(&vcs, &host);

        let pr = publisher
            .publish(Path::new("/tmp/ws"), &repository(), &audit(), &[issue(1), issue(2)])
            .await
            .unwrap();

        assert_eq!(pr.number, 12);
        assert_eq!(
            *vcs.calls.lock().unwrap(),
            vec![
                "branch fix/ai-auto-patch-7".to_string(),
                "stage".to_string(),
                "commit 🤖 patchpilot: Fix 2 issues".to_string(),
                "push fix/ai-auto-patch-7".to_string(),
            ]
        );
        assert_eq!(
            *host.requests.lock().unwrap(),
            vec![("octo/demo".to_string(), "fix/ai-auto-patch-7".to_string(), "main".to_string())]
        );
    }

    #[tokio::test]
    async fn test_push_failure_is_absent_result() {
        let vcs = RecordingVcs {
            fail_push: true,
            ..Default::default()
        };
        let host = RecordingHost::default();
        let publisher = Publisher::new(&vcs, &host);

        let result = publisher
            .publish(Path::new("/tmp/ws"), &repository(), &audit(), &[issue(1)])
            .await;
        assert!(result.is_none());
        assert!(host.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_never_publishes_onto_base_branch() {
        let vcs = RecordingVcs::default();
        let host = RecordingHost::default();
        let mut repo = repository();
        repo.branch = "fix/ai-auto-patch-7".into();

        let err = Publisher::new(&vcs, &host)
            .try_publish(Path::new("/tmp/ws"), &repo, &audit(), &[issue(1)])
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::BaseBranch(_)));
        assert!(vcs.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_commit_message_lists_first_ten() {
        let issues: Vec<Issue> = (0..13).map(issue).collect();
        let message = commit_message(&issues);
        assert!(message.starts_with("🤖 patchpilot: Fix 13 issues\n"));
        assert!(message.contains("- security_vulnerability: problem 0\n"));
        assert!(message.contains("- security_vulnerability: problem 9\n"));
        assert!(!message.contains("problem 10"));
        assert!(message.ends_with("- ... and 3 more\n"));
    }

    #[test]
    fn test_commit_message_without_overflow() {
        let message = commit_message(&[issue(1)]);
        assert!(!message.contains("more"));
    }

    #[test]
    fn test_pr_body_breakdown() {
        let body = pr_body(&audit(), &[issue(1), issue(2)]);
        assert!(body.contains("**Total Issues Found**: 2"));
        assert!(body.contains("**Fixes Applied**: 1"));
        assert!(body.contains("#### Security Vulnerability - HIGH"));
        assert!(body.contains("**File**: `src/file2.py`"));
        assert!(body.contains("**Description**: problem 1"));
        // only the even-numbered issue has a line
        assert_eq!(body.matches("**Line**:").count(), 1);
        assert!(body.contains("**Line**: 3"));
    }
}
