//! Shared fakes for the pipeline integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use patchpilot::config::{RetrySettings, Settings};
use patchpilot::git_ops::{CloneAttemptError, Vcs};
use patchpilot::github::{HostError, PullRequest, PullRequestHost};
use patchpilot::llm::prompts::{SECRET_SCAN_SYSTEM, VALIDATE_FIX_SYSTEM};
use patchpilot::llm::{AiServiceError, CompletionService};
use patchpilot::models::{Audit, LogEntry};
use patchpilot::store::AuditStore;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use tempfile::TempDir;

// ============================================================================
// Version control
// ============================================================================

/// Remote that "clones" by writing fixture files; records publishing steps
pub struct FakeRemote {
    branches: Vec<String>,
    files: Vec<(String, String)>,
    unreachable: bool,
    fail_push: bool,
    /// Every call, in order: `clone:<branch>`, `branch:<name>`, `stage`, `commit`, `push:<name>`
    pub calls: Mutex<Vec<String>>,
    /// Working-tree contents captured at commit time
    pub committed: Mutex<HashMap<String, String>>,
}

impl FakeRemote {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self {
            branches: vec!["main".to_string()],
            files: files
                .iter()
                .map(|(path, content)| (path.to_string(), content.to_string()))
                .collect(),
            unreachable: false,
            fail_push: false,
            calls: Mutex::new(Vec::new()),
            committed: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_branches(mut self, branches: &[&str]) -> Self {
        self.branches = branches.iter().map(|b| b.to_string()).collect();
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub fn failing_push(mut self) -> Self {
        self.fail_push = true;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Vcs for FakeRemote {
    fn clone_branch(
        &self,
        _url: &str,
        branch: &str,
        dest: &Path,
    ) -> Result<(), CloneAttemptError> {
        self.record(format!("clone:{}", branch));
        if self.unreachable {
            return Err(CloneAttemptError::Failed(
                "git clone failed: Repository not found".to_string(),
            ));
        }
        if !self.branches.iter().any(|b| b == branch) {
            return Err(CloneAttemptError::BranchNotFound {
                branch: branch.to_string(),
                message: format!("Remote branch {} not found in upstream origin", branch),
            });
        }

        std::fs::create_dir_all(dest).unwrap();
        for (path, content) in &self.files {
            let full = dest.join(path);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(full, content).unwrap();
        }
        Ok(())
    }

    fn create_branch(&self, _repo_path: &Path, name: &str) -> anyhow::Result<()> {
        self.record(format!("branch:{}", name));
        Ok(())
    }

    fn stage_all(&self, _repo_path: &Path) -> anyhow::Result<()> {
        self.record("stage".to_string());
        Ok(())
    }

    fn commit(&self, repo_path: &Path, _message: &str) -> anyhow::Result<String> {
        self.record("commit".to_string());
        let mut committed = self.committed.lock().unwrap();
        for (path, _) in &self.files {
            let content = std::fs::read_to_string(repo_path.join(path))?;
            committed.insert(path.clone(), content);
        }
        Ok("0123456789abcdef".to_string())
    }

    fn push(&self, _repo_path: &Path, branch: &str) -> anyhow::Result<()> {
        self.record(format!("push:{}", branch));
        if self.fail_push {
            anyhow::bail!("remote rejected push");
        }
        Ok(())
    }
}

// ============================================================================
// AI service
// ============================================================================

/// Replies per analyzed file; everything unscripted gets an empty result
#[derive(Default)]
pub struct ScriptedAi {
    by_file: Mutex<HashMap<String, VecDeque<Result<String, AiServiceError>>>>,
    /// Secret scans of content containing this marker report one secret
    secret_marker: Option<String>,
    reject_fixes: bool,
    hang: bool,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedAi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the analysis of `file`
    pub fn reply(self, file: &str, reply: Result<String, AiServiceError>) -> Self {
        self.by_file
            .lock()
            .unwrap()
            .entry(file.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn with_secret_marker(mut self, marker: &str) -> Self {
        self.secret_marker = Some(marker.to_string());
        self
    }

    pub fn rejecting_fixes(mut self) -> Self {
        self.reject_fixes = true;
        self
    }

    /// Never answer
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Files whose analysis was requested, in order
    pub fn analyzed_files(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter_map(|user| {
                user.lines()
                    .next()
                    .and_then(|line| line.strip_prefix("File to analyze: "))
                    .map(str::to_string)
            })
            .collect()
    }
}

#[async_trait]
impl CompletionService for ScriptedAi {
    async fn complete(&self, system: &str, user: &str) -> Result<String, AiServiceError> {
        if self.hang {
            std::future::pending::<()>().await;
        }

        if system == VALIDATE_FIX_SYSTEM {
            return Ok(format!("{{\"valid\": {}}}", !self.reject_fixes));
        }
        if system == SECRET_SCAN_SYSTEM {
            let found = self
                .secret_marker
                .as_deref()
                .is_some_and(|marker| user.contains(marker));
            return Ok(if found {
                r#"{"secrets": [{"type": "api_key", "description": "AWS key exposed",
                    "line": 1, "severity": "critical"}]}"#
                    .to_string()
            } else {
                r#"{"secrets": []}"#.to_string()
            });
        }

        self.prompts.lock().unwrap().push(user.to_string());
        let file = user
            .lines()
            .next()
            .and_then(|line| line.strip_prefix("File to analyze: "))
            .unwrap_or_default()
            .to_string();
        self.by_file
            .lock()
            .unwrap()
            .get_mut(&file)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(r#"{"issues": []}"#.to_string()))
    }
}

/// A one-issue analysis reply replacing `original` with `fixed`
pub fn issue_reply(
    file: &str,
    original: &str,
    fixed: Option<&str>,
) -> Result<String, AiServiceError> {
    let issue = serde_json::json!({
        "file_path": file,
        "line_number": 1,
        "issue_type": "logic_error",
        "severity": "high",
        "description": "Wrong constant",
        "explanation": "The value should be two",
        "original_code": original,
        "fixed_code": fixed,
    });
    Ok(serde_json::json!({ "issues": [issue] }).to_string())
}

pub fn rate_limited() -> Result<String, AiServiceError> {
    Err(AiServiceError::RateLimited {
        message: "too many requests".to_string(),
    })
}

// ============================================================================
// Pull request host
// ============================================================================

#[derive(Default)]
pub struct RecordingHost {
    pub fail: bool,
    /// (full_name, head, base, title)
    pub created: Mutex<Vec<(String, String, String, String)>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn created(&self) -> Vec<(String, String, String, String)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl PullRequestHost for RecordingHost {
    async fn create_pull_request(
        &self,
        full_name: &str,
        head: &str,
        base: &str,
        title: &str,
        _body: &str,
    ) -> Result<PullRequest, HostError> {
        if self.fail {
            return Err(HostError::Api("Validation Failed".to_string()));
        }
        self.created.lock().unwrap().push((
            full_name.to_string(),
            head.to_string(),
            base.to_string(),
            title.to_string(),
        ));
        Ok(PullRequest {
            url: format!("https://github.com/{}/pull/42", full_name),
            number: 42,
        })
    }

    async fn fork_repository(&self, full_name: &str) -> Result<String, HostError> {
        let name = full_name.rsplit('/').next().unwrap_or(full_name);
        Ok(format!("patchpilot-bot/{}", name))
    }
}

// ============================================================================
// Store and settings
// ============================================================================

/// In-memory store plus settings pointing at a private clone directory
pub struct Harness {
    pub store: AuditStore,
    pub settings: Settings,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let settings = Settings {
            clone_dir: dir.path().join("clones"),
            database_path: dir.path().join("audits.db"),
            retry: RetrySettings {
                max_attempts: 3,
                quota_backoff_secs: 0,
                rate_limit_backoff_secs: 0,
            },
            ..Settings::default()
        };
        Self {
            store: AuditStore::open_in_memory().expect("Failed to open store"),
            settings,
            dir,
        }
    }

    /// Queue an audit for `acme/widgets` on `branch`
    pub fn submit(&self, branch: &str) -> Audit {
        let repo = self
            .store
            .get_or_create_repository("acme", "widgets", "https://github.com/acme/widgets", branch)
            .unwrap();
        self.store.create_audit(repo.id).unwrap()
    }

    pub fn messages(&self, audit_id: i64) -> Vec<String> {
        self.store
            .logs(audit_id)
            .unwrap()
            .into_iter()
            .map(|entry: LogEntry| entry.message)
            .collect()
    }

    /// Workspaces still present under the clone directory
    pub fn leftover_workspaces(&self) -> usize {
        match std::fs::read_dir(&self.settings.clone_dir) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

// ============================================================================
// Real git
// ============================================================================

pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub fn git(dir: &Path, args: &[&str]) {
    let output = Command::new("git")
        .args(["-c", "user.name=Test User", "-c", "user.email=test@test.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
}

/// A repository whose only branch is `branch`, with one committed file
pub fn create_origin(branch: &str, files: &[(&str, &str)]) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let repo_path = temp_dir.path();

    git(repo_path, &["init", "--quiet"]);
    git(repo_path, &["checkout", "--quiet", "-b", branch]);
    for (path, content) in files {
        let full = repo_path.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
    git(repo_path, &["add", "."]);
    git(repo_path, &["commit", "--quiet", "-m", "Initial commit"]);

    temp_dir
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}
