//! Version control operations for the audit pipeline
//!
//! Clone and push shell out to `git` (transport, credentials and shallow
//! clones are its job); branch, stage and commit go through git2.

use crate::util::redact_credentials;
use anyhow::{Context, Result};
use git2::{IndexAddOption, Repository, Signature};
use std::path::Path;
use std::process::Command;
use thiserror::Error;

/// Why a single clone attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloneAttemptError {
    /// The remote exists but has no branch with this name
    #[error("remote branch '{branch}' not found: {message}")]
    BranchNotFound { branch: String, message: String },

    /// Anything else: auth, network, missing repository, local I/O
    #[error("{0}")]
    Failed(String),
}

/// The operations the pipeline needs from a version control tool
pub trait Vcs: Send + Sync {
    /// Shallow clone (depth 1) of a single branch into `dest`
    fn clone_branch(&self, url: &str, branch: &str, dest: &Path) -> Result<(), CloneAttemptError>;

    /// Create a branch at HEAD and check it out
    fn create_branch(&self, repo_path: &Path, name: &str) -> Result<()>;

    /// Stage every working-tree change, including deletions
    fn stage_all(&self, repo_path: &Path) -> Result<()>;

    /// Commit the index on the current branch, returning the commit id
    fn commit(&self, repo_path: &Path, message: &str) -> Result<String>;

    /// Push a local branch to `origin`
    fn push(&self, repo_path: &Path, branch: &str) -> Result<()>;
}

/// `git` CLI + git2 implementation
#[derive(Debug, Clone, Default)]
pub struct GitCli {
    /// GitHub token injected into https clone URLs
    token: Option<String>,
}

impl GitCli {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    fn clone_url(&self, url: &str) -> String {
        match self.token.as_deref() {
            Some(token) => authenticated_url(url, token),
            None => url.to_string(),
        }
    }
}

/// Embed a token into an https GitHub URL. Other URLs are returned unchanged.
pub fn authenticated_url(url: &str, token: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(url) else {
        return url.to_string();
    };
    let is_github = parsed.host_str() == Some("github.com");
    if parsed.scheme() != "https" || !is_github {
        return url.to_string();
    }
    if parsed.set_username("x-access-token").is_err() || parsed.set_password(Some(token)).is_err() {
        return url.to_string();
    }
    parsed.to_string()
}

/// git's wording when `--branch` names something the remote lacks
fn is_missing_branch(stderr: &str) -> bool {
    stderr.contains("Remote branch") && stderr.contains("not found")
}

impl Vcs for GitCli {
    fn clone_branch(&self, url: &str, branch: &str, dest: &Path) -> Result<(), CloneAttemptError> {
        let output = Command::new("git")
            .args(["clone", "--depth", "1", "--single-branch", "--branch", branch])
            .arg(self.clone_url(url))
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .map_err(|e| CloneAttemptError::Failed(format!("Failed to execute git clone: {}", e)))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = redact_credentials(String::from_utf8_lossy(&output.stderr).trim());
        if is_missing_branch(&stderr) {
            Err(CloneAttemptError::BranchNotFound {
                branch: branch.to_string(),
                message: stderr,
            })
        } else {
            Err(CloneAttemptError::Failed(format!("git clone failed: {}", stderr)))
        }
    }

    fn create_branch(&self, repo_path: &Path, name: &str) -> Result<()> {
        let repo = Repository::open(repo_path)?;
        let head = repo.head().context("Failed to get HEAD")?;
        let commit = head.peel_to_commit()?;

        repo.branch(name, &commit, false)
            .with_context(|| format!("Failed to create branch '{}'", name))?;

        let refname = format!("refs/heads/{}", name);
        let object = repo.revparse_single(&refname)?;
        repo.checkout_tree(&object, None)?;
        repo.set_head(&refname)?;
        Ok(())
    }

    fn stage_all(&self, repo_path: &Path) -> Result<()> {
        let repo = Repository::open(repo_path)?;
        let mut index = repo.index()?;

        index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        Ok(())
    }

    fn commit(&self, repo_path: &Path, message: &str) -> Result<String> {
        let repo = Repository::open(repo_path)?;
        let mut index = repo.index()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let parent = repo.head()?.peel_to_commit()?;

        // Clones made by the worker usually have no identity configured
        let config = repo.config()?;
        let name = config
            .get_string("user.name")
            .unwrap_or_else(|_| "patchpilot".to_string());
        let email = config
            .get_string("user.email")
            .unwrap_or_else(|_| "patchpilot@users.noreply.github.com".to_string());
        let sig = Signature::now(&name, &email)?;

        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?;
        Ok(oid.to_string())
    }

    fn push(&self, repo_path: &Path, branch: &str) -> Result<()> {
        let output = Command::new("git")
            .current_dir(repo_path)
            .args(["push", "-u", "origin", branch])
            .env("GIT_TERMINAL_PROMPT", "0")
            .output()
            .context("Failed to execute git push")?;

        if output.status.success() {
            Ok(())
        } else {
            Err(anyhow::anyhow!(
                "git push failed: {}",
                redact_credentials(String::from_utf8_lossy(&output.stderr).trim())
            ))
        }
    }
}
