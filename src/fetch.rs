//! Repository fetching with branch fallback
//!
//! Clones into a fresh, uniquely named workspace under the clone directory.
//! The returned [`Workspace`] deletes the directory when dropped.

use crate::git_ops::{CloneAttemptError, Vcs};
use chrono::Local;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloneError {
    #[error("failed to prepare clone directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The first attempt's error, even when fallbacks were tried
    #[error(transparent)]
    Clone(#[from] CloneAttemptError),
}

/// A transient clone on local disk, removed on drop
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
}

impl Workspace {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::info!("Cleaned up clone directory: {}", self.path.display()),
            Err(e) => tracing::error!("Failed to cleanup {}: {}", self.path.display(), e),
        }
    }
}

/// Result of a successful fetch
#[derive(Debug)]
pub struct FetchedRepository {
    pub workspace: Workspace,
    /// Branch that was actually cloned
    pub branch: String,
    /// True when the requested branch was missing and a fallback was used
    pub used_fallback: bool,
}

/// Alternates to try, in order, when `requested` does not exist on the remote
pub fn fallback_branches(requested: &str) -> &'static [&'static str] {
    match requested {
        "main" => &["master", "develop", "dev"],
        "master" => &["main", "develop", "dev"],
        _ => &["main", "master"],
    }
}

/// Repository name from a clone URL: `https://github.com/o/demo.git` -> `demo`
pub fn repo_name_from_url(url: &str) -> String {
    let last = url
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or("")
        .trim_end_matches(".git");
    let cleaned: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "repository".to_string()
    } else {
        cleaned
    }
}

pub struct RepositoryFetcher<'a> {
    vcs: &'a dyn Vcs,
    clone_dir: PathBuf,
}

impl<'a> RepositoryFetcher<'a> {
    pub fn new(vcs: &'a dyn Vcs, clone_dir: impl Into<PathBuf>) -> Self {
        Self {
            vcs,
            clone_dir: clone_dir.into(),
        }
    }

    /// Fresh workspace path: `<clone_dir>/<repo>_<YYYYmmdd_HHMMSS>_<8 hex>`
    fn workspace_path(&self, url: &str) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        self.clone_dir.join(format!(
            "{}_{}_{}",
            repo_name_from_url(url),
            timestamp,
            &suffix[..8]
        ))
    }

    /// Shallow-clone `branch`, falling back to conventional branch names only
    /// when the requested branch is missing on the remote.
    pub fn fetch(&self, url: &str, branch: &str) -> Result<FetchedRepository, CloneError> {
        std::fs::create_dir_all(&self.clone_dir).map_err(|source| CloneError::Io {
            path: self.clone_dir.clone(),
            source,
        })?;

        let workspace = Workspace::new(self.workspace_path(url));
        tracing::info!("Cloning {} to {}", url, workspace.path().display());

        let original = match self.vcs.clone_branch(url, branch, workspace.path()) {
            Ok(()) => {
                tracing::info!("Successfully cloned branch '{}'", branch);
                return Ok(FetchedRepository {
                    workspace,
                    branch: branch.to_string(),
                    used_fallback: false,
                });
            }
            Err(err @ CloneAttemptError::BranchNotFound { .. }) => err,
            Err(err) => return Err(err.into()),
        };

        tracing::warn!("Branch '{}' not found, trying fallback branches...", branch);
        for fallback in fallback_branches(branch) {
            clear_partial_clone(workspace.path());
            tracing::info!("Attempting to clone with branch '{}'...", fallback);
            match self.vcs.clone_branch(url, fallback, workspace.path()) {
                Ok(()) => {
                    tracing::info!("Successfully cloned using fallback branch '{}'", fallback);
                    return Ok(FetchedRepository {
                        workspace,
                        branch: fallback.to_string(),
                        used_fallback: true,
                    });
                }
                Err(err) => {
                    tracing::warn!("Branch '{}' also failed: {}", fallback, err);
                }
            }
        }

        tracing::error!("All branch attempts failed for {}", url);
        Err(original.into())
    }
}

fn clear_partial_clone(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_dir_all(path) {
            tracing::warn!("Failed to clear partial clone {}: {}", path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Remote with a fixed set of branches; records every attempt
    struct FakeRemote {
        branches: Vec<&'static str>,
        unreachable: bool,
        attempts: Mutex<Vec<String>>,
    }

    impl FakeRemote {
        fn with_branches(branches: &[&'static str]) -> Self {
            Self {
                branches: branches.to_vec(),
                unreachable: false,
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl Vcs for FakeRemote {
        fn clone_branch(
            &self,
            _url: &str,
            branch: &str,
            dest: &Path,
        ) -> Result<(), CloneAttemptError> {
            self.attempts.lock().unwrap().push(branch.to_string());
            if self.unreachable {
                return Err(CloneAttemptError::Failed("could not resolve host".to_string()));
            }
            if self.branches.contains(&branch) {
                std::fs::create_dir_all(dest).unwrap();
                std::fs::write(dest.join("BRANCH"), branch).unwrap();
                Ok(())
            } else {
                Err(CloneAttemptError::BranchNotFound {
                    branch: branch.to_string(),
                    message: format!("Remote branch {} not found in upstream origin", branch),
                })
            }
        }

        fn create_branch(&self, _: &Path, _: &str) -> anyhow::Result<()> {
            unimplemented!()
        }
        fn stage_all(&self, _: &Path) -> anyhow::Result<()> {
            unimplemented!()
        }
        fn commit(&self, _: &Path, _: &str) -> anyhow::Result<String> {
            unimplemented!()
        }
        fn push(&self, _: &Path, _: &str) -> anyhow::Result<()> {
            unimplemented!()
        }
    }

    #[test]
    fn test_fallback_tables() {
        let expected: HashMap<&str, &[&str]> = HashMap::from([
            ("main", &["master", "develop", "dev"][..]),
            ("master", &["main", "develop", "dev"][..]),
            ("release", &["main", "master"][..]),
        ]);
        for (requested, fallbacks) in expected {
            assert_eq!(fallback_branches(requested), fallbacks);
        }
    }

    #[test]
    fn test_requested_branch_clones_directly() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::with_branches(&["main"]);
        let fetched = RepositoryFetcher::new(&remote, dir.path())
            .fetch("https://github.com/octo/demo.git", "main")
            .unwrap();
        assert_eq!(fetched.branch, "main");
        assert!(!fetched.used_fallback);
        assert_eq!(remote.attempts(), vec!["main"]);
        assert!(fetched.workspace.path().starts_with(dir.path()));
        assert!(fetched
            .workspace
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("demo_"));
    }

    #[test]
    fn test_main_falls_back_to_master() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::with_branches(&["master"]);
        let fetched = RepositoryFetcher::new(&remote, dir.path())
            .fetch("https://github.com/octo/demo", "main")
            .unwrap();
        assert_eq!(fetched.branch, "master");
        assert!(fetched.used_fallback);
        assert_eq!(remote.attempts(), vec!["main", "master"]);
    }

    #[test]
    fn test_custom_branch_tries_main_then_master() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::with_branches(&["master"]);
        let fetched = RepositoryFetcher::new(&remote, dir.path())
            .fetch("https://github.com/octo/demo", "feature/x")
            .unwrap();
        assert_eq!(fetched.branch, "master");
        assert_eq!(remote.attempts(), vec!["feature/x", "main", "master"]);
    }

    #[test]
    fn test_exhausted_fallbacks_surface_original_error() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::with_branches(&["trunk"]);
        let err = RepositoryFetcher::new(&remote, dir.path())
            .fetch("https://github.com/octo/demo", "main")
            .unwrap_err();

        match err {
            CloneError::Clone(CloneAttemptError::BranchNotFound { branch, .. }) => {
                assert_eq!(branch, "main")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(remote.attempts(), vec!["main", "master", "develop", "dev"]);
    }

    #[test]
    fn test_other_failures_are_not_retried() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote {
            unreachable: true,
            ..FakeRemote::with_branches(&["main"])
        };
        let err = RepositoryFetcher::new(&remote, dir.path())
            .fetch("https://github.com/octo/demo", "main")
            .unwrap_err();
        assert!(matches!(err, CloneError::Clone(CloneAttemptError::Failed(_))));
        assert_eq!(remote.attempts(), vec!["main"]);
    }

    #[test]
    fn test_workspace_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::with_branches(&["main"]);
        let fetched = RepositoryFetcher::new(&remote, dir.path())
            .fetch("https://github.com/octo/demo", "main")
            .unwrap();
        let path = fetched.workspace.path().to_path_buf();
        assert!(path.join("BRANCH").exists());
        drop(fetched);
        assert!(!path.exists());
    }

    #[test]
    fn test_repo_name_from_url() {
        assert_eq!(repo_name_from_url("https://github.com/octo/demo.git"), "demo");
        assert_eq!(repo_name_from_url("https://github.com/octo/demo/"), "demo");
        assert_eq!(repo_name_from_url("git@github.com:octo/my-repo.git"), "my-repo");
        assert_eq!(repo_name_from_url(""), "repository");
    }
}
